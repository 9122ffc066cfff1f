//! Scripted in-memory browser used by tests.
//!
//! A [`FakeSite`] is a graph of screens. Clicking an element with an
//! `on_click` target moves the page to that screen and replays the screen's
//! background responses to subscribed listeners.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    BrowserHandle, BrowserLauncher, CapturedResponse, ClickTarget, ElementInfo, ListenerId,
    PageDriver, PageEvent, PageListener,
};
use crate::error::ScrapeError;
use crate::navigator::{FULL_SCAN_SELECTOR, INTERACTIVE_SELECTOR};

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub selectors: Vec<String>,
    pub text: String,
    pub title: Option<String>,
    pub value: Option<String>,
    pub visible: bool,
    pub on_click: Option<String>,
}

impl FakeElement {
    pub fn new(selector: &str, text: &str) -> Self {
        Self {
            selectors: vec![selector.to_string()],
            text: text.to_string(),
            visible: true,
            ..Default::default()
        }
    }

    /// Generic interactive element (button/link).
    pub fn button(text: &str) -> Self {
        Self::new(INTERACTIVE_SELECTOR, text)
    }

    /// Plain text node only reachable through the full-DOM scan.
    pub fn text(text: &str) -> Self {
        Self {
            selectors: Vec::new(),
            ..Self::new("", text)
        }
    }

    pub fn goes_to(mut self, screen: &str) -> Self {
        self.on_click = Some(screen.to_string());
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    fn matches(&self, selector: &str) -> bool {
        selector == FULL_SCAN_SELECTOR || self.selectors.iter().any(|s| s == selector)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Screen {
    pub elements: Vec<FakeElement>,
    pub text: Option<String>,
    pub html: String,
    pub ready: Vec<String>,
    pub responses: Vec<CapturedResponse>,
}

impl Screen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    /// Selector that `wait_for_selector` reports as present.
    pub fn ready(mut self, selector: &str) -> Self {
        self.ready.push(selector.to_string());
        self
    }

    pub fn response(mut self, url: &str, mime_type: &str, body: &str) -> Self {
        self.responses.push(CapturedResponse {
            url: url.to_string(),
            mime_type: mime_type.to_string(),
            status: 200,
            body: Some(body.to_string()),
        });
        self
    }

    fn rendered_text(&self) -> String {
        match &self.text {
            Some(text) => text.clone(),
            None => self
                .elements
                .iter()
                .map(|e| e.text.as_str())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeSite {
    start: String,
    screens: HashMap<String, Screen>,
    unreachable: bool,
    work: Duration,
}

impl FakeSite {
    pub fn new(start: &str) -> Self {
        Self {
            start: start.to_string(),
            screens: HashMap::new(),
            unreachable: false,
            work: Duration::ZERO,
        }
    }

    pub fn blank() -> Self {
        Self::new("home").screen("home", Screen::new())
    }

    pub fn screen(mut self, name: &str, screen: Screen) -> Self {
        self.screens.insert(name.to_string(), screen);
        self
    }

    /// Small booking widget: entry link, mode switch, two specialties, two
    /// practitioners with rendered and intercepted slots, one calendar day.
    pub fn clinic() -> Self {
        FakeSite::new("home")
            .screen(
                "home",
                Screen::new()
                    .element(FakeElement::button("Inicio"))
                    .element(FakeElement::button("Reservar Hora").goes_to("mode")),
            )
            .screen(
                "mode",
                Screen::new()
                    .element(FakeElement::button("Por profesional"))
                    .element(FakeElement::button("Por especialidad").goes_to("specialties")),
            )
            .screen(
                "specialties",
                Screen::new()
                    .element(FakeElement::button("Volver"))
                    .element(FakeElement::new(".specialty-item", "Kinesiología").goes_to("kine"))
                    .element(FakeElement::new(".specialty-item", "Nutrición")),
            )
            .screen(
                "kine",
                Screen::new()
                    .text("Dr. Ana Lopez\nEspecialidad: Kinesiología\nSucursal: Centro\nLuis Soto\nEspecialidad: Kinesiología")
                    .element(FakeElement::new("[data-professional]", "Dr. Ana Lopez").goes_to("ana"))
                    .element(FakeElement::new("[data-professional]", "Luis Soto").goes_to("luis")),
            )
            .screen(
                "ana",
                Screen::new()
                    .text("09:00 DISPONIBLE\n09:00 DISPONIBLE\n10:30 OCUPADO")
                    .element(FakeElement::new("[data-date]", "22").with_value("2026-10-22").goes_to("ana_22")),
            )
            .screen(
                "ana_22",
                Screen::new()
                    .text("Sin horas")
                    .response("https://agenda.example.test/api/horas", "application/json", r#"[{"hora": "15:00", "disponible": true}]"#),
            )
            .screen(
                "luis",
                Screen::new()
                    .text("Luis Soto")
                    .response("https://agenda.example.test/api/horas", "application/json", r#"{"horas": ["11:00", "11:30"]}"#),
            )
    }

    /// Every navigation fails.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Simulated time spent loading the root page.
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    fn get(&self, name: &str) -> Screen {
        self.screens.get(name).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct FakeStats {
    launches: AtomicU64,
    browser_closes: AtomicU64,
    pages_opened: AtomicU64,
    pages_closed: AtomicU64,
    active_pages: AtomicUsize,
    max_active_pages: AtomicUsize,
    gotos: AtomicU64,
    unsubscribes: AtomicU64,
}

impl FakeStats {
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn browser_closes(&self) -> u64 {
        self.browser_closes.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> u64 {
        self.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> u64 {
        self.pages_closed.load(Ordering::SeqCst)
    }

    pub fn max_active_pages(&self) -> usize {
        self.max_active_pages.load(Ordering::SeqCst)
    }

    pub fn gotos(&self) -> u64 {
        self.gotos.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> u64 {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

pub struct FakeLauncher {
    site: Arc<FakeSite>,
    stats: Arc<FakeStats>,
    failing_launches: AtomicU64,
    failing_close: bool,
    launch_delay: Duration,
    browsers: Mutex<Vec<Arc<FakeBrowser>>>,
}

impl FakeLauncher {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            stats: Arc::new(FakeStats::default()),
            failing_launches: AtomicU64::new(0),
            failing_close: false,
            launch_delay: Duration::ZERO,
            browsers: Mutex::new(Vec::new()),
        }
    }

    /// The next `count` launches fail.
    pub fn failing_launches(self, count: u64) -> Self {
        self.failing_launches.store(count, Ordering::SeqCst);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.failing_close = true;
        self
    }

    /// Every launch takes `delay` before the browser is ready.
    pub fn slow_launch(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        Arc::clone(&self.stats)
    }

    /// Marks every launched browser as unresponsive.
    pub fn kill_browsers(&self) {
        for browser in self.browsers.lock().iter() {
            browser.alive.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserHandle>, ScrapeError> {
        let pending_failures = self.failing_launches.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_launches.store(pending_failures - 1, Ordering::SeqCst);
            return Err(ScrapeError::Launch("fake launch failure".into()));
        }
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }

        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        let browser = Arc::new(FakeBrowser {
            site: Arc::clone(&self.site),
            stats: Arc::clone(&self.stats),
            alive: AtomicBool::new(true),
            failing_close: self.failing_close,
        });
        self.browsers.lock().push(Arc::clone(&browser));
        Ok(browser)
    }
}

pub struct FakeBrowser {
    site: Arc<FakeSite>,
    stats: Arc<FakeStats>,
    alive: AtomicBool,
    failing_close: bool,
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn new_page(&self) -> Result<Box<dyn PageDriver>, ScrapeError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ScrapeError::automation("browser is gone"));
        }
        self.stats.pages_opened.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active_pages.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active_pages.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(FakePage {
            site: Arc::clone(&self.site),
            stats: Arc::clone(&self.stats),
            current: Mutex::new(self.site.start.clone()),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        self.alive.store(false, Ordering::SeqCst);
        self.stats.browser_closes.fetch_add(1, Ordering::SeqCst);
        if self.failing_close {
            return Err(ScrapeError::automation("fake close failure"));
        }
        Ok(())
    }
}

pub struct FakePage {
    site: Arc<FakeSite>,
    stats: Arc<FakeStats>,
    current: Mutex<String>,
    listeners: Mutex<HashMap<u64, Arc<dyn PageListener>>>,
    next_listener: AtomicU64,
    closed: AtomicBool,
}

impl FakePage {
    fn screen(&self) -> Screen {
        self.site.get(&self.current.lock())
    }

    fn matching(&self, selector: &str) -> Vec<(usize, FakeElement)> {
        self.screen()
            .elements
            .into_iter()
            .filter(|e| e.matches(selector))
            .enumerate()
            .collect()
    }

    fn enter(&self, name: &str) {
        *self.current.lock() = name.to_string();
        let responses = self.site.get(name).responses;
        self.emit_all(responses.into_iter().map(PageEvent::ResponseReceived));
    }

    fn emit_all(&self, events: impl Iterator<Item = PageEvent>) {
        let listeners: Vec<_> = self.listeners.lock().values().cloned().collect();
        for event in events {
            for listener in &listeners {
                listener.on_event(&event);
            }
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), ScrapeError> {
        self.stats.gotos.fetch_add(1, Ordering::SeqCst);
        if !self.site.work.is_zero() {
            tokio::time::sleep(self.site.work).await;
        }
        if self.site.unreachable {
            let reason = "net::ERR_NAME_NOT_RESOLVED".to_string();
            self.emit_all(std::iter::once(PageEvent::NavigationFailed {
                url: url.to_string(),
                reason: reason.clone(),
            }));
            return Err(ScrapeError::Navigation {
                url: url.to_string(),
                reason,
            });
        }
        let start = self.site.start.clone();
        self.enter(&start);
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<bool, ScrapeError> {
        let screen = self.screen();
        Ok(screen.ready.iter().any(|s| s == selector)
            || screen.elements.iter().any(|e| e.selectors.iter().any(|s| s == selector)))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementInfo>, ScrapeError> {
        Ok(self
            .matching(selector)
            .into_iter()
            .map(|(index, e)| ElementInfo {
                index,
                tag: "div".to_string(),
                text: e.text,
                title: e.title,
                value: e.value,
                visible: e.visible,
            })
            .collect())
    }

    async fn click_nth(&self, selector: &str, index: usize, _target: ClickTarget) -> Result<bool, ScrapeError> {
        let Some((_, element)) = self.matching(selector).into_iter().find(|(i, _)| *i == index) else {
            return Ok(false);
        };
        if let Some(next) = element.on_click {
            self.enter(&next);
        }
        Ok(true)
    }

    async fn inner_text(&self) -> Result<String, ScrapeError> {
        Ok(self.screen().rendered_text())
    }

    async fn html(&self) -> Result<String, ScrapeError> {
        Ok(self.screen().html)
    }

    async fn subscribe(&self, listener: Arc<dyn PageListener>) -> Result<ListenerId, ScrapeError> {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().insert(id, listener);
        Ok(ListenerId(id))
    }

    async fn unsubscribe(&self, id: ListenerId) -> Result<(), ScrapeError> {
        if self.listeners.lock().remove(&id.0).is_some() {
            self.stats.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.listeners.lock().clear();
            self.stats.pages_closed.fetch_add(1, Ordering::SeqCst);
            self.stats.active_pages.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
