//! Turning rendered booking pages into records.
//!
//! Each record type has an ordered list of [`Strategy`] objects; the first one
//! returning a non-empty list wins. Parsing lives in plain functions so it can
//! be exercised without a browser.

pub mod practitioners;
pub mod slots;
pub mod specialties;

use async_trait::async_trait;
use std::collections::HashSet;
use std::hash::Hash;
use tracing::{debug, warn};

use crate::browser::PageDriver;
use crate::error::ScrapeError;

pub use practitioners::Practitioner;
pub use slots::{SlotState, TimeSlot};
pub use specialties::Specialty;

#[async_trait]
pub trait Strategy<T>: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the strategy does not apply to this page.
    async fn try_extract(&self, page: &dyn PageDriver) -> Result<Option<Vec<T>>, ScrapeError>;
}

/// Runs `strategies` in order and returns the first non-empty result.
///
/// Errors that leave the browser unusable abort the run; anything else is
/// logged and the next strategy is tried. No match is an empty list.
pub async fn run_strategies<T: Send>(
    page: &dyn PageDriver,
    strategies: &[Box<dyn Strategy<T>>],
) -> Result<Vec<T>, ScrapeError> {
    for strategy in strategies {
        match strategy.try_extract(page).await {
            Ok(Some(items)) if !items.is_empty() => {
                debug!(strategy = strategy.name(), count = items.len(), "extraction strategy matched");
                return Ok(items);
            }
            Ok(_) => debug!(strategy = strategy.name(), "extraction strategy found nothing"),
            Err(e) if e.poisons_browser() => return Err(e),
            Err(e) => warn!(strategy = strategy.name(), "extraction strategy failed: {}", e),
        }
    }
    Ok(Vec::new())
}

/// Trimmed, non-empty lines.
pub fn lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Keeps the first item for every key, preserving order.
pub fn dedupe_by<T, K, F>(items: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}
