//! Lifecycle of the single shared browser process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{BrowserHandle, BrowserLauncher, PageDriver};
use crate::error::ScrapeError;

/// Owns the shared browser handle. Launches lazily, recycles after
/// `recycle_threshold` completed workflows and after fatal automation errors.
pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    recycle_threshold: u64,
    handle: Mutex<Option<Arc<dyn BrowserHandle>>>,
    /// Mirrors `handle.is_some()` so readers never wait behind a launch.
    live: AtomicBool,
    since_recycle: AtomicU64,
    completed: AtomicU64,
    launches: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub completed: u64,
    pub since_recycle: u64,
    pub launches: u64,
    pub recycle_threshold: u64,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, recycle_threshold: u64) -> Self {
        Self {
            launcher,
            recycle_threshold: recycle_threshold.max(1),
            handle: Mutex::new(None),
            live: AtomicBool::new(false),
            since_recycle: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            launches: AtomicU64::new(0),
        }
    }

    /// Returns the live browser, launching one if there is none or the
    /// current one stopped responding. A failed launch leaves the slot empty.
    pub async fn acquire(&self) -> Result<Arc<dyn BrowserHandle>, ScrapeError> {
        let mut slot = self.handle.lock().await;

        if let Some(handle) = slot.as_ref() {
            if handle.is_alive().await {
                return Ok(Arc::clone(handle));
            }
            warn!("Shared browser stopped responding, relaunching");
            self.live.store(false, Ordering::SeqCst);
            if let Some(dead) = slot.take() {
                close_quietly(dead).await;
            }
            self.since_recycle.store(0, Ordering::SeqCst);
        }

        let handle = self.launcher.launch().await?;
        let launches = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        info!(launches, "✅ Browser ready");
        *slot = Some(Arc::clone(&handle));
        self.live.store(true, Ordering::SeqCst);
        Ok(handle)
    }

    /// Opens a fresh page on the shared browser.
    pub async fn open_page(&self) -> Result<Box<dyn PageDriver>, ScrapeError> {
        let browser = self.acquire().await?;
        browser.new_page().await
    }

    /// Records one finished workflow and recycles the browser once the
    /// threshold is reached.
    pub async fn complete(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        let since = self.since_recycle.fetch_add(1, Ordering::SeqCst) + 1;
        if since >= self.recycle_threshold {
            info!(since, threshold = self.recycle_threshold, "♻️ Recycling browser");
            self.recycle().await;
        }
    }

    /// Closes the current browser (tolerating close failures) so the next
    /// `acquire` launches a new one.
    pub async fn recycle(&self) {
        let previous = self.handle.lock().await.take();
        self.live.store(false, Ordering::SeqCst);
        self.since_recycle.store(0, Ordering::SeqCst);
        if let Some(handle) = previous {
            close_quietly(handle).await;
        }
    }

    /// Best-effort close on process shutdown.
    pub async fn shutdown(&self) {
        let previous = self.handle.lock().await.take();
        self.live.store(false, Ordering::SeqCst);
        if let Some(handle) = previous {
            info!("Closing shared browser");
            close_quietly(handle).await;
        }
    }

    /// Whether a browser is currently held. Does not wait for an in-flight
    /// launch or liveness check.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            completed: self.completed.load(Ordering::SeqCst),
            since_recycle: self.since_recycle.load(Ordering::SeqCst),
            launches: self.launches.load(Ordering::SeqCst),
            recycle_threshold: self.recycle_threshold,
        }
    }
}

async fn close_quietly(handle: Arc<dyn BrowserHandle>) {
    if let Err(e) = handle.close().await {
        warn!("Ignoring browser close failure: {}", e);
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
