use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::browser::SessionManager;
use crate::cache::ResponseCache;
use crate::config::{FlowConfig, SourceRegistry};
use crate::error::ScrapeError;
use crate::extract::slots::filter_slots;
use crate::extract::{Practitioner, Specialty, TimeSlot};
use crate::queue::SerialQueue;
use crate::workflows::{
    self, PractitionersWorkflow, SlotsWorkflow, SpecialtiesWorkflow, Workflow, WorkflowOutcome,
};

/// Point-in-time view of the process for the health endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthReport {
    pub status: String,
    pub uptime_secs: u64,
    /// Workflows finished since start.
    pub completed: u64,
    pub completed_since_recycle: u64,
    pub recycle_threshold: u64,
    pub browser_launches: u64,
    pub browser_live: bool,
    /// Jobs waiting behind the running one.
    pub queue_depth: usize,
    pub queue_busy: bool,
    /// Jobs the queue has settled, including failures.
    pub queue_processed: u64,
    pub cache_entries: usize,
    pub sources: Vec<String>,
}

/// Validation → cache → serial queue → browser workflow.
pub struct BookingService {
    sources: SourceRegistry,
    cache: ResponseCache,
    queue: SerialQueue,
    session: Arc<SessionManager>,
    flow: FlowConfig,
    started_at: Instant,
}

fn required(value: &str, name: &'static str) -> Result<String, ScrapeError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ScrapeError::MissingParameter(name));
    }
    Ok(value.to_string())
}

/// `YYYY-MM-DD`; blank means "whatever day the widget shows".
pub fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ScrapeError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| ScrapeError::InvalidParameter {
                name: "fecha",
                reason: format!("expected YYYY-MM-DD ({e})"),
            }),
    }
}

impl BookingService {
    pub fn new(
        sources: SourceRegistry,
        cache: ResponseCache,
        queue: SerialQueue,
        session: Arc<SessionManager>,
        flow: FlowConfig,
    ) -> Self {
        Self {
            sources,
            cache,
            queue,
            session,
            flow,
            started_at: Instant::now(),
        }
    }

    async fn fetch<W: Workflow>(&self, source_key: &str, workflow: W) -> Result<WorkflowOutcome<W::Item>, ScrapeError> {
        let source = self.sources.resolve(source_key)?.clone();
        let key = format!("{}|{}", source.key, workflow.cache_key());

        if let Some(items) = self.cache.get_as::<Vec<W::Item>>(W::KIND, &key) {
            debug!(kind = %W::KIND, %key, "cache hit");
            return Ok(WorkflowOutcome::Success(items));
        }

        let label = format!("{}:{}", W::KIND, source.key);
        let session = Arc::clone(&self.session);
        let flow = self.flow.clone();
        let outcome = self
            .queue
            .submit(label, move || async move { workflows::execute(&session, &source, &flow, &workflow).await })
            .await?;

        if let WorkflowOutcome::Success(items) = &outcome {
            self.cache.set_as(W::KIND, &key, items);
        }
        Ok(outcome)
    }

    pub async fn specialties(&self, source_key: &str) -> Result<WorkflowOutcome<Specialty>, ScrapeError> {
        let source_key = required(source_key, "clinica")?;
        self.fetch(&source_key, SpecialtiesWorkflow).await
    }

    pub async fn practitioners(&self, source_key: &str, specialty: &str) -> Result<WorkflowOutcome<Practitioner>, ScrapeError> {
        let source_key = required(source_key, "clinica")?;
        self.sources.resolve(&source_key)?;
        let specialty = required(specialty, "especialidad")?;
        self.fetch(&source_key, PractitionersWorkflow { specialty }).await
    }

    /// Slots are cached unfiltered; `include_taken` only shapes the answer.
    pub async fn slots(
        &self,
        source_key: &str,
        specialty: &str,
        practitioner: &str,
        date: Option<&str>,
        include_taken: bool,
    ) -> Result<WorkflowOutcome<TimeSlot>, ScrapeError> {
        let source_key = required(source_key, "clinica")?;
        self.sources.resolve(&source_key)?;
        let workflow = SlotsWorkflow {
            specialty: required(specialty, "especialidad")?,
            practitioner: required(practitioner, "profesional")?,
            date: parse_date(date)?,
        };

        Ok(match self.fetch(&source_key, workflow).await? {
            WorkflowOutcome::Success(slots) => WorkflowOutcome::Success(filter_slots(slots, include_taken)),
            failure => failure,
        })
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn health(&self) -> HealthReport {
        let session = self.session.stats();
        HealthReport {
            status: "ok".to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            completed: session.completed,
            completed_since_recycle: session.since_recycle,
            recycle_threshold: session.recycle_threshold,
            browser_launches: session.launches,
            browser_live: self.session.is_live(),
            queue_depth: self.queue.depth(),
            queue_busy: self.queue.is_busy(),
            queue_processed: self.queue.processed(),
            cache_entries: self.cache.len(),
            sources: self.sources.keys().map(str::to_string).collect(),
        }
    }

    /// Stops accepting work; jobs already queued still run.
    pub fn close_queue(&self) {
        info!("Closing scrape queue");
        self.queue.close();
    }

    pub async fn close_browser(&self) {
        self.session.shutdown().await;
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
