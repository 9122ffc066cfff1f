use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ScrapeError;

/// A named external scheduling site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingSource {
    pub key: String,
    pub url: String,
}

/// Immutable key → site registry built at startup.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, BookingSource>,
}

impl SourceRegistry {
    pub fn new(sources: impl IntoIterator<Item = BookingSource>) -> Self {
        let sources = sources
            .into_iter()
            .map(|s| (canonical_key(&s.key), s))
            .collect();
        Self { sources }
    }

    /// Parses `key=url` pairs separated by commas.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut sources = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, url) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("booking source '{entry}' is not in key=url form"))?;
            let (key, url) = (key.trim(), url.trim());
            if key.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("booking source '{entry}' needs a key and an http(s) url");
            }
            sources.push(BookingSource {
                key: canonical_key(key),
                url: url.to_string(),
            });
        }
        if sources.is_empty() {
            bail!("no booking sources configured");
        }
        Ok(Self::new(sources))
    }

    pub fn resolve(&self, key: &str) -> Result<&BookingSource, ScrapeError> {
        self.sources
            .get(&canonical_key(key))
            .ok_or_else(|| ScrapeError::UnknownSource(key.trim().to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }
}

fn canonical_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Headless Chrome launch options.
#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub headless: bool,
    pub sandbox: bool,
    pub path: Option<PathBuf>,
    pub window_size: (u32, u32),
    pub idle_timeout: Duration,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: false,
            path: None,
            window_size: (1366, 900),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Timing knobs of the booking-flow navigation.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub navigation_timeout: Duration,
    pub step_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            step_timeout: Duration::from_secs(8),
            settle_delay: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub specialties_ttl: Duration,
    pub practitioners_ttl: Duration,
    pub slots_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            specialties_ttl: Duration::from_secs(600),
            practitioners_ttl: Duration::from_secs(300),
            slots_ttl: Duration::from_secs(45),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub sources: SourceRegistry,
    pub recycle_threshold: u64,
    pub queue_cooldown: Duration,
    pub flow: FlowConfig,
    pub cache: CacheConfig,
    pub chrome: ChromeConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let raw_sources = env::var("BOOKING_SOURCES").context("BOOKING_SOURCES must be set")?;
        let sources = SourceRegistry::parse(&raw_sources).context("invalid BOOKING_SOURCES")?;

        let flow = FlowConfig {
            navigation_timeout: Duration::from_secs(var_or("NAVIGATION_TIMEOUT_SECS", 30)?),
            step_timeout: Duration::from_secs(var_or("STEP_TIMEOUT_SECS", 8)?),
            settle_delay: Duration::from_millis(var_or("SETTLE_DELAY_MS", 1500)?),
        };

        let cache = CacheConfig {
            enabled: var_or("CACHE_ENABLED", true)?,
            specialties_ttl: Duration::from_secs(var_or("CACHE_TTL_SPECIALTIES_SECS", 600)?),
            practitioners_ttl: Duration::from_secs(var_or("CACHE_TTL_PRACTITIONERS_SECS", 300)?),
            slots_ttl: Duration::from_secs(var_or("CACHE_TTL_SLOTS_SECS", 45)?),
        };

        let chrome = ChromeConfig {
            headless: var_or("CHROME_HEADLESS", true)?,
            sandbox: var_or("CHROME_SANDBOX", false)?,
            path: env::var("CHROME_PATH").ok().filter(|p| !p.is_empty()).map(PathBuf::from),
            ..ChromeConfig::default()
        };

        Ok(Self {
            port: var_or("PORT", 3000)?,
            sources,
            recycle_threshold: var_or::<u64>("BROWSER_RECYCLE_THRESHOLD", 8)?.max(1),
            queue_cooldown: Duration::from_millis(var_or("QUEUE_COOLDOWN_MS", 1200)?),
            flow,
            cache,
            chrome,
        })
    }
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{name}={raw:?} is invalid: {e}")),
        _ => Ok(default),
    }
}
