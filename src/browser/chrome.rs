//! `headless_chrome` implementation of the browser traits.
//!
//! `headless_chrome` is a blocking API, so every call runs on the blocking
//! thread pool.

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network::events::ResponseReceivedEventParams;
use headless_chrome::protocol::cdp::Network::GetResponseBodyReturnObject;
use headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument;
use headless_chrome::{Browser, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    BrowserHandle, BrowserLauncher, CapturedResponse, ClickTarget, ElementInfo, ListenerId,
    PageDriver, PageEvent, PageListener,
};
use crate::config::ChromeConfig;
use crate::error::ScrapeError;

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/123.0.0.0 Safari/537.36",
    ]
});

const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'languages', { get: () => ['es-CL', 'es', 'en'] });
    window.chrome = window.chrome || { runtime: {} };
"#;

const RESPONSE_HANDLER: &str = "agenda-crawler-listeners";

pub struct ChromeLauncher {
    config: ChromeConfig,
    step_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(config: ChromeConfig, step_timeout: Duration) -> Self {
        Self {
            config,
            step_timeout,
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserHandle>, ScrapeError> {
        let config = self.config.clone();
        let browser = tokio::task::spawn_blocking(move || launch_blocking(&config))
            .await
            .map_err(|e| ScrapeError::Launch(e.to_string()))??;

        Ok(Arc::new(ChromeBrowser {
            browser: Mutex::new(Some(browser)),
            step_timeout: self.step_timeout,
        }))
    }
}

fn launch_blocking(config: &ChromeConfig) -> Result<Browser, ScrapeError> {
    let user_agent = USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0]);
    let ua_arg = format!("--user-agent={}", user_agent);

    let args = vec![
        OsStr::new("--disable-blink-features=AutomationControlled"),
        OsStr::new("--disable-dev-shm-usage"),
        OsStr::new("--disable-gpu"),
        OsStr::new("--disable-infobars"),
        OsStr::new("--no-first-run"),
        OsStr::new("--no-default-browser-check"),
        OsStr::new("--lang=es-CL"),
        OsStr::new(&ua_arg),
    ];

    info!(headless = config.headless, user_agent, "🚀 Launching Chrome");
    Browser::new(LaunchOptions {
        headless: config.headless,
        sandbox: config.sandbox,
        window_size: Some(config.window_size),
        path: config.path.clone(),
        idle_browser_timeout: config.idle_timeout,
        args,
        ..Default::default()
    })
    .map_err(|e| ScrapeError::Launch(e.to_string()))
}

struct ChromeBrowser {
    browser: Mutex<Option<Browser>>,
    step_timeout: Duration,
}

impl ChromeBrowser {
    fn browser(&self) -> Result<Browser, ScrapeError> {
        self.browser
            .lock()
            .clone()
            .ok_or_else(|| ScrapeError::automation("browser already closed"))
    }
}

#[async_trait]
impl BrowserHandle for ChromeBrowser {
    async fn is_alive(&self) -> bool {
        let Ok(browser) = self.browser() else {
            return false;
        };
        tokio::task::spawn_blocking(move || browser.get_version().is_ok())
            .await
            .unwrap_or(false)
    }

    async fn new_page(&self) -> Result<Box<dyn PageDriver>, ScrapeError> {
        let browser = self.browser()?;
        let step_timeout = self.step_timeout;
        let tab = tokio::task::spawn_blocking(move || -> anyhow::Result<Arc<Tab>> {
            let tab = browser.new_tab()?;
            tab.set_default_timeout(step_timeout);
            tab.call_method(AddScriptToEvaluateOnNewDocument {
                source: STEALTH_SCRIPT.to_string(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })?;
            Ok(tab)
        })
        .await
        .map_err(ScrapeError::automation)?
        .map_err(ScrapeError::automation)?;

        Ok(Box::new(ChromePage {
            tab,
            step_timeout,
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_listener: AtomicU64::new(1),
        }))
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        // Dropping the last `Browser` clone terminates the process.
        let taken = self.browser.lock().take();
        if let Some(browser) = taken {
            tokio::task::spawn_blocking(move || drop(browser))
                .await
                .map_err(ScrapeError::automation)?;
        }
        Ok(())
    }
}

type Listeners = Arc<Mutex<HashMap<u64, Arc<dyn PageListener>>>>;

struct ChromePage {
    tab: Arc<Tab>,
    step_timeout: Duration,
    listeners: Listeners,
    next_listener: AtomicU64,
}

impl ChromePage {
    async fn blocking<T, F>(&self, op: F) -> Result<T, ScrapeError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .map_err(ScrapeError::automation)?
            .map_err(ScrapeError::automation)
    }

    async fn evaluate_value(&self, script: String) -> Result<serde_json::Value, ScrapeError> {
        self.blocking(move |tab| {
            let result = tab.evaluate(&script, false)?;
            Ok(result.value.unwrap_or(serde_json::Value::Null))
        })
        .await
    }

    fn emit(&self, event: PageEvent) {
        let listeners: Vec<_> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), ScrapeError> {
        let target = url.to_string();
        let step_timeout = self.step_timeout;
        let result = self
            .blocking(move |tab| {
                tab.set_default_timeout(timeout);
                let outcome = tab
                    .navigate_to(&target)
                    .and_then(|tab| tab.wait_until_navigated())
                    .map(|_| ());
                tab.set_default_timeout(step_timeout);
                outcome
            })
            .await;

        if let Err(err) = result {
            let reason = err.to_string();
            self.emit(PageEvent::NavigationFailed {
                url: url.to_string(),
                reason: reason.clone(),
            });
            return Err(ScrapeError::Navigation {
                url: url.to_string(),
                reason,
            });
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool, ScrapeError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            Ok(tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .is_ok())
        })
        .await
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementInfo>, ScrapeError> {
        let script = format!(
            r#"(() => {{
                let nodes;
                try {{ nodes = document.querySelectorAll({selector}); }} catch (e) {{ return '[]'; }}
                const out = [];
                nodes.forEach((el, index) => {{
                    const text = (el.innerText || el.textContent || '').trim();
                    if (text.length > 300) return;
                    const title = el.getAttribute('title') || el.getAttribute('aria-label');
                    const value = el.getAttribute('data-value') || el.getAttribute('data-date')
                        || el.getAttribute('data-id') || el.getAttribute('value');
                    if (!text && !title && !value) return;
                    const rect = el.getBoundingClientRect();
                    out.push({{
                        index,
                        tag: el.tagName.toLowerCase(),
                        text,
                        title,
                        value,
                        visible: rect.width > 0 && rect.height > 0,
                    }});
                }});
                return JSON.stringify(out);
            }})()"#,
            selector = serde_json::to_string(selector).map_err(ScrapeError::automation)?,
        );

        match self.evaluate_value(script).await? {
            serde_json::Value::String(raw) => {
                serde_json::from_str(&raw).map_err(ScrapeError::automation)
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn click_nth(&self, selector: &str, index: usize, target: ClickTarget) -> Result<bool, ScrapeError> {
        let script = format!(
            r#"(() => {{
                let nodes;
                try {{ nodes = document.querySelectorAll({selector}); }} catch (e) {{ return false; }}
                const el = nodes[{index}];
                if (!el) return false;
                const clickable = 'button, a, [role="button"], [role="option"], input[type="radio"], label';
                let target = el;
                if ({mode} === 'descendant') target = el.querySelector(clickable) || el;
                if ({mode} === 'ancestor') target = el.closest(clickable + ', li') || el;
                target.scrollIntoView({{ block: 'center' }});
                target.click();
                return true;
            }})()"#,
            selector = serde_json::to_string(selector).map_err(ScrapeError::automation)?,
            index = index,
            mode = serde_json::to_string(target.as_str()).map_err(ScrapeError::automation)?,
        );

        Ok(self.evaluate_value(script).await?.as_bool().unwrap_or(false))
    }

    async fn inner_text(&self) -> Result<String, ScrapeError> {
        let value = self
            .evaluate_value("document.body ? document.body.innerText : ''".to_string())
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn html(&self) -> Result<String, ScrapeError> {
        self.blocking(|tab| tab.get_content()).await
    }

    async fn subscribe(&self, listener: Arc<dyn PageListener>) -> Result<ListenerId, ScrapeError> {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut listeners = self.listeners.lock();
            listeners.insert(id, listener);
            listeners.len() == 1
        };

        if first {
            let listeners = Arc::clone(&self.listeners);
            let registered = self
                .blocking(move |tab| {
                    tab.register_response_handling(
                        RESPONSE_HANDLER,
                        Box::new(
                            move |params: ResponseReceivedEventParams,
                                  fetch_body: &dyn Fn() -> anyhow::Result<GetResponseBodyReturnObject>| {
                                dispatch_response(&listeners, params, fetch_body);
                            },
                        ),
                    )?;
                    Ok(())
                })
                .await;
            if let Err(err) = registered {
                self.listeners.lock().remove(&id);
                return Err(err);
            }
        }

        debug!(listener = id, "page listener subscribed");
        Ok(ListenerId(id))
    }

    async fn unsubscribe(&self, id: ListenerId) -> Result<(), ScrapeError> {
        let now_empty = {
            let mut listeners = self.listeners.lock();
            listeners.remove(&id.0).is_some() && listeners.is_empty()
        };
        if now_empty {
            self.blocking(|tab| {
                tab.deregister_response_handling(RESPONSE_HANDLER)?;
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        let had_listeners = {
            let mut listeners = self.listeners.lock();
            let had = !listeners.is_empty();
            listeners.clear();
            had
        };
        self.blocking(move |tab| {
            if had_listeners {
                let _ = tab.deregister_response_handling(RESPONSE_HANDLER);
            }
            tab.close(false)?;
            Ok(())
        })
        .await
    }
}

type BodyFetcher<'a> = &'a dyn Fn() -> anyhow::Result<GetResponseBodyReturnObject>;

fn dispatch_response(
    listeners: &Listeners,
    params: ResponseReceivedEventParams,
    fetch_body: BodyFetcher<'_>,
) {
    let snapshot: Vec<_> = listeners.lock().values().cloned().collect();
    if snapshot.is_empty() {
        return;
    }

    let mut captured = CapturedResponse {
        url: params.response.url.clone(),
        mime_type: params.response.mime_type.clone(),
        status: params.response.status as u16,
        body: None,
    };
    if captured.is_textual() {
        captured.body = response_body(&captured.url, fetch_body);
    }

    let event = PageEvent::ResponseReceived(captured);
    for listener in snapshot {
        listener.on_event(&event);
    }
}

/// Text body of an intercepted response. Base64 payloads are binary and skipped.
fn response_body(url: &str, fetch_body: BodyFetcher<'_>) -> Option<String> {
    match fetch_body() {
        Ok(body) if !body.base_64_encoded => Some(body.body),
        Ok(_) => None,
        Err(e) => {
            warn!(url = %url, "could not read response body: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: &str, base_64_encoded: bool) -> anyhow::Result<GetResponseBodyReturnObject> {
        Ok(GetResponseBodyReturnObject {
            body: text.to_string(),
            base_64_encoded,
        })
    }

    #[test]
    fn test_response_body_reads_driver_fetcher() {
        let url = "https://agenda.example.test/api/horas";
        let json = || body(r#"[{"hora":"09:00"}]"#, false);
        assert_eq!(response_body(url, &json).as_deref(), Some(r#"[{"hora":"09:00"}]"#));

        let binary = || body("AAEC", true);
        assert_eq!(response_body(url, &binary), None);

        let evicted = || -> anyhow::Result<GetResponseBodyReturnObject> {
            Err(anyhow::anyhow!("No resource with given identifier found"))
        };
        assert_eq!(response_body(url, &evicted), None);
    }

    #[tokio::test]
    async fn test_close_without_browser_is_noop() {
        let browser = ChromeBrowser {
            browser: Mutex::new(None),
            step_timeout: Duration::from_secs(1),
        };
        // Runs on a spawned task, so the close future must be `Send`.
        let handle: Arc<dyn BrowserHandle> = Arc::new(browser);
        let closing = tokio::spawn({
            let handle = Arc::clone(&handle);
            async move { handle.close().await }
        });
        closing.await.unwrap().unwrap();
        assert!(!handle.is_alive().await);
        assert!(handle.new_page().await.is_err());
    }
}
