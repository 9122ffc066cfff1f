//! The booking-flow state machine and the three scrape workflows.
//!
//! Every workflow walks the same path through the widget:
//! root page, booking entry point, "by specialty" mode, then as far down the
//! specialty / practitioner / slots chain as it needs. Steps that may already
//! be satisfied are tolerated when their target is missing; steps that select
//! something the caller asked for fail softly.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::browser::{PageDriver, SessionManager};
use crate::config::{BookingSource, FlowConfig};
use crate::error::ScrapeError;
use crate::extract::practitioners::{self, PRACTITIONER_ITEM_SELECTORS};
use crate::extract::slots::{self, ResponseCollector};
use crate::extract::specialties::{self, SPECIALTY_ITEM_SELECTORS};
use crate::extract::{run_strategies, Practitioner, Specialty, TimeSlot};
use crate::navigator::{
    click_calendar_date, click_first_visible_text, click_option, wait_for_content_settle,
};
use crate::normalize::normalize;

const ENTRY_PHRASES: &[&str] = &[
    "Reservar hora",
    "Reserva de horas",
    "Agendar hora",
    "Agenda online",
    "Reservar",
];

const BY_SPECIALTY_PHRASES: &[&str] = &["Por especialidad", "Buscar por especialidad", "Especialidad"];

/// Markers that the slot grid (or its calendar) has rendered.
const SLOT_SELECTORS: &[&str] = &[
    "[data-slot]",
    "[data-hora]",
    "[class*='hora']",
    "[class*='slot']",
    "[class*='horario']",
    "[data-date]",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlowState {
    Start,
    Opened,
    SpecialtyListVisible,
    SpecialtySelected,
    PractitionerListVisible,
    PractitionerSelected,
    SlotsVisible,
    Done,
}

/// Cursor over one page walking the booking flow.
pub struct BookingFlow<'a> {
    page: &'a dyn PageDriver,
    source: &'a BookingSource,
    config: &'a FlowConfig,
    state: FlowState,
}

impl<'a> BookingFlow<'a> {
    pub fn new(page: &'a dyn PageDriver, source: &'a BookingSource, config: &'a FlowConfig) -> Self {
        Self {
            page,
            source,
            config,
            state: FlowState::Start,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    fn advance(&mut self, next: FlowState) {
        debug!(source = %self.source.key, from = ?self.state, to = ?next, "flow transition");
        self.state = next;
    }

    async fn settle(&self, selectors: &[&str]) -> bool {
        wait_for_content_settle(self.page, selectors, self.config.step_timeout, self.config.settle_delay).await
    }

    /// Loads the source root and opens the booking entry point. Sites that
    /// land directly inside the widget have no entry link; that is fine.
    pub async fn open(&mut self) -> Result<(), ScrapeError> {
        self.page.goto(&self.source.url, self.config.navigation_timeout).await?;
        match click_first_visible_text(self.page, ENTRY_PHRASES).await {
            Some(phrase) => debug!(phrase, "opened booking entry point"),
            None => debug!("no booking entry point, assuming the widget is already open"),
        }
        self.advance(FlowState::Opened);
        Ok(())
    }

    /// Switches to "by specialty" mode (tolerated when absent) and waits for
    /// the specialty list.
    pub async fn show_specialties(&mut self) -> Result<(), ScrapeError> {
        if click_first_visible_text(self.page, BY_SPECIALTY_PHRASES).await.is_none() {
            debug!("no specialty mode switch, assuming specialty list is showing");
        }
        self.settle(SPECIALTY_ITEM_SELECTORS).await;
        self.advance(FlowState::SpecialtyListVisible);
        Ok(())
    }

    pub async fn select_specialty(&mut self, specialty: &str) -> Result<(), ScrapeError> {
        if !click_option(self.page, SPECIALTY_ITEM_SELECTORS, specialty).await {
            return Err(ScrapeError::not_found(format!("Especialidad no encontrada: {specialty}")));
        }
        self.advance(FlowState::SpecialtySelected);
        self.settle(PRACTITIONER_ITEM_SELECTORS).await;
        self.advance(FlowState::PractitionerListVisible);
        Ok(())
    }

    pub async fn select_practitioner(&mut self, practitioner: &str) -> Result<(), ScrapeError> {
        if !click_option(self.page, PRACTITIONER_ITEM_SELECTORS, practitioner).await {
            return Err(ScrapeError::not_found(format!("Profesional no encontrado: {practitioner}")));
        }
        self.advance(FlowState::PractitionerSelected);
        Ok(())
    }

    /// Picks a calendar day. Only valid once a practitioner is selected.
    pub async fn select_date(&mut self, date: NaiveDate) -> Result<(), ScrapeError> {
        self.settle(SLOT_SELECTORS).await;
        if !click_calendar_date(self.page, date).await {
            return Err(ScrapeError::not_found(format!("Fecha no disponible: {date}")));
        }
        Ok(())
    }

    pub async fn show_slots(&mut self) -> Result<(), ScrapeError> {
        self.settle(SLOT_SELECTORS).await;
        self.advance(FlowState::SlotsVisible);
        Ok(())
    }

    pub fn finish(&mut self) {
        self.advance(FlowState::Done);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    Specialties,
    Practitioners,
    Slots,
}

impl WorkflowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowKind::Specialties => "specialties",
            WorkflowKind::Practitioners => "practitioners",
            WorkflowKind::Slots => "slots",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settled result of a workflow that did not hit an infrastructure error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome<T> {
    Success(Vec<T>),
    /// A UI element the caller asked for could not be located.
    Failure(String),
}

#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Item: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    const KIND: WorkflowKind;

    /// Parameters identifying this request within its source, normalized.
    fn cache_key(&self) -> String;

    async fn run(
        &self,
        page: &dyn PageDriver,
        source: &BookingSource,
        config: &FlowConfig,
    ) -> Result<Vec<Self::Item>, ScrapeError>;
}

pub struct SpecialtiesWorkflow;

#[async_trait]
impl Workflow for SpecialtiesWorkflow {
    type Item = Specialty;

    const KIND: WorkflowKind = WorkflowKind::Specialties;

    fn cache_key(&self) -> String {
        String::new()
    }

    async fn run(&self, page: &dyn PageDriver, source: &BookingSource, config: &FlowConfig) -> Result<Vec<Specialty>, ScrapeError> {
        let mut flow = BookingFlow::new(page, source, config);
        flow.open().await?;
        flow.show_specialties().await?;
        let found = run_strategies(page, &specialties::strategies()).await?;
        flow.finish();
        Ok(found)
    }
}

pub struct PractitionersWorkflow {
    pub specialty: String,
}

#[async_trait]
impl Workflow for PractitionersWorkflow {
    type Item = Practitioner;

    const KIND: WorkflowKind = WorkflowKind::Practitioners;

    fn cache_key(&self) -> String {
        normalize(&self.specialty)
    }

    async fn run(&self, page: &dyn PageDriver, source: &BookingSource, config: &FlowConfig) -> Result<Vec<Practitioner>, ScrapeError> {
        let mut flow = BookingFlow::new(page, source, config);
        flow.open().await?;
        flow.show_specialties().await?;
        flow.select_specialty(&self.specialty).await?;
        let found = run_strategies(page, &practitioners::strategies(&self.specialty)).await?;
        flow.finish();
        Ok(found)
    }
}

pub struct SlotsWorkflow {
    pub specialty: String,
    pub practitioner: String,
    pub date: Option<NaiveDate>,
}

impl SlotsWorkflow {
    async fn walk_to_slots(
        &self,
        flow: &mut BookingFlow<'_>,
        page: &dyn PageDriver,
        collector: &Arc<ResponseCollector>,
    ) -> Result<Vec<TimeSlot>, ScrapeError> {
        flow.select_practitioner(&self.practitioner).await?;
        if let Some(date) = self.date {
            collector.clear();
            flow.select_date(date).await?;
        }
        flow.show_slots().await?;
        run_strategies(page, &slots::strategies(Arc::clone(collector))).await
    }
}

#[async_trait]
impl Workflow for SlotsWorkflow {
    type Item = TimeSlot;

    const KIND: WorkflowKind = WorkflowKind::Slots;

    fn cache_key(&self) -> String {
        let date = self.date.map(|d| d.to_string()).unwrap_or_default();
        format!("{}|{}|{}", normalize(&self.specialty), normalize(&self.practitioner), date)
    }

    /// Background responses are observed from the practitioner click on,
    /// since that is when the widget fetches availability.
    async fn run(&self, page: &dyn PageDriver, source: &BookingSource, config: &FlowConfig) -> Result<Vec<TimeSlot>, ScrapeError> {
        let mut flow = BookingFlow::new(page, source, config);
        flow.open().await?;
        flow.show_specialties().await?;
        flow.select_specialty(&self.specialty).await?;

        let collector = Arc::new(ResponseCollector::default());
        let listener = page.subscribe(collector.clone()).await?;
        let result = self.walk_to_slots(&mut flow, page, &collector).await;
        if let Err(e) = page.unsubscribe(listener).await {
            warn!("Failed to unsubscribe response collector: {}", e);
        }

        let found = result?;
        debug!(intercepted = collector.len(), slots = found.len(), "slot extraction finished");
        flow.finish();
        Ok(found)
    }
}

/// Runs `workflow` on a fresh page of the shared browser.
///
/// The page is always closed. Soft failures settle into
/// [`WorkflowOutcome::Failure`]; infrastructure errors propagate and recycle
/// the browser when they leave it in an unknown state.
pub async fn execute<W: Workflow>(
    session: &SessionManager,
    source: &BookingSource,
    config: &FlowConfig,
    workflow: &W,
) -> Result<WorkflowOutcome<W::Item>, ScrapeError> {
    let page = match session.open_page().await {
        Ok(page) => page,
        Err(e) => {
            error!(kind = %W::KIND, source = %source.key, "❌ Could not open page: {}", e);
            if e.poisons_browser() {
                session.recycle().await;
            }
            return Err(e);
        }
    };

    let result = workflow.run(page.as_ref(), source, config).await;
    if let Err(e) = page.close().await {
        warn!("Ignoring page close failure: {}", e);
    }
    drop(page);

    match result {
        Ok(items) => {
            info!(kind = %W::KIND, source = %source.key, count = items.len(), "✅ Workflow finished");
            session.complete().await;
            Ok(WorkflowOutcome::Success(items))
        }
        Err(e) if e.is_soft() => {
            warn!(kind = %W::KIND, source = %source.key, "⚠️ {}", e);
            session.complete().await;
            Ok(WorkflowOutcome::Failure(e.to_string()))
        }
        Err(e) => {
            error!(kind = %W::KIND, source = %source.key, "❌ Workflow failed: {}", e);
            if e.poisons_browser() {
                session.recycle().await;
            } else {
                session.complete().await;
            }
            Err(e)
        }
    }
}

#[cfg(test)]
#[path = "workflows_tests.rs"]
mod tests;
