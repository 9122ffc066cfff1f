//! Browser automation seam.
//!
//! Workflows only talk to the traits in this module. The production
//! implementation lives in [`chrome`]; tests use a scripted fake.

pub mod chrome;
pub mod session;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ScrapeError;

pub use session::SessionManager;

/// Starts a fresh browser process.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserHandle>, ScrapeError>;
}

/// A live browser process.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Cheap liveness probe.
    async fn is_alive(&self) -> bool;

    async fn new_page(&self) -> Result<Box<dyn PageDriver>, ScrapeError>;

    async fn close(&self) -> Result<(), ScrapeError>;
}

/// Which node receives the click once a candidate element is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    Itself,
    /// Closest clickable ancestor, used when a text leaf was matched.
    ClickableAncestor,
    /// First clickable descendant, used for list/grid items.
    ClickableDescendant,
}

impl ClickTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            ClickTarget::Itself => "self",
            ClickTarget::ClickableAncestor => "ancestor",
            ClickTarget::ClickableDescendant => "descendant",
        }
    }
}

/// Snapshot of one element returned by a selector query.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ElementInfo {
    /// Position in the full `querySelectorAll` result for the selector.
    pub index: usize,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    /// `data-value`, `data-date`, `data-id` or `value` attribute.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

/// A background response observed on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedResponse {
    pub url: String,
    pub mime_type: String,
    pub status: u16,
    pub body: Option<String>,
}

impl CapturedResponse {
    pub fn is_json(&self) -> bool {
        self.mime_type.contains("json")
    }

    pub fn is_textual(&self) -> bool {
        self.is_json() || self.mime_type.starts_with("text/")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    ResponseReceived(CapturedResponse),
    NavigationFailed { url: String, reason: String },
}

/// Typed page observer. Registered with [`PageDriver::subscribe`] and
/// removed with [`PageDriver::unsubscribe`] before the page is closed.
pub trait PageListener: Send + Sync {
    fn on_event(&self, event: &PageEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// One browser tab, owned by a single workflow.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigates and waits for the load to finish. Failures are
    /// infrastructure errors.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), ScrapeError>;

    /// `Ok(false)` when nothing matched within `timeout`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool, ScrapeError>;

    /// Elements matching `selector` that carry some text, title or value.
    async fn query_all(&self, selector: &str) -> Result<Vec<ElementInfo>, ScrapeError>;

    /// Clicks the `index`-th match of `selector`. `Ok(false)` if it vanished.
    async fn click_nth(&self, selector: &str, index: usize, target: ClickTarget) -> Result<bool, ScrapeError>;

    /// Rendered `innerText` of the document body.
    async fn inner_text(&self) -> Result<String, ScrapeError>;

    /// Serialized DOM.
    async fn html(&self) -> Result<String, ScrapeError>;

    async fn subscribe(&self, listener: Arc<dyn PageListener>) -> Result<ListenerId, ScrapeError>;

    async fn unsubscribe(&self, id: ListenerId) -> Result<(), ScrapeError>;

    async fn close(&self) -> Result<(), ScrapeError>;
}
