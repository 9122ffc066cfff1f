use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::workflows::WorkflowKind;

struct CacheEntry {
    stored_at: Instant,
    ttl: Duration,
    payload: Value,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

/// In-memory TTL cache of successful workflow results, keyed by workflow
/// kind and request key. Only successes are ever stored.
pub struct ResponseCache {
    config: CacheConfig,
    entries: RwLock<HashMap<(WorkflowKind, String), CacheEntry>>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl_for(&self, kind: WorkflowKind) -> Duration {
        match kind {
            WorkflowKind::Specialties => self.config.specialties_ttl,
            WorkflowKind::Practitioners => self.config.practitioners_ttl,
            WorkflowKind::Slots => self.config.slots_ttl,
        }
    }

    /// Expired entries read as a miss.
    pub fn get(&self, kind: WorkflowKind, key: &str) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }
        let entries = self.entries.read();
        let entry = entries.get(&(kind, key.to_string()))?;
        entry.is_fresh(Instant::now()).then(|| entry.payload.clone())
    }

    pub fn set(&self, kind: WorkflowKind, key: &str, payload: Value) {
        self.set_with_ttl(kind, key, payload, self.ttl_for(kind));
    }

    pub fn set_with_ttl(&self, kind: WorkflowKind, key: &str, payload: Value, ttl: Duration) {
        if !self.config.enabled || ttl.is_zero() {
            return;
        }
        self.entries.write().insert(
            (kind, key.to_string()),
            CacheEntry {
                stored_at: Instant::now(),
                ttl,
                payload,
            },
        );
        debug!(%kind, key, ttl_secs = ttl.as_secs_f64(), "cached workflow result");
    }

    pub fn get_as<T: DeserializeOwned>(&self, kind: WorkflowKind, key: &str) -> Option<T> {
        let payload = self.get(kind, key)?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%kind, key, "Discarding unreadable cache entry: {}", e);
                None
            }
        }
    }

    pub fn set_as<T: Serialize>(&self, kind: WorkflowKind, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(payload) => self.set(kind, key, payload),
            Err(e) => warn!(%kind, key, "Not caching unserializable result: {}", e),
        }
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
