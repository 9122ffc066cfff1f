use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{IntoParams, ToSchema};

use crate::error::ScrapeError;
use crate::extract::{Practitioner, Specialty, TimeSlot};
use crate::service::{BookingService, HealthReport};
use crate::workflows::WorkflowOutcome;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BookingService>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SpecialtiesQuery {
    /// Booking source key.
    #[serde(default)]
    pub clinica: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PractitionersQuery {
    #[serde(default)]
    pub clinica: String,
    /// Specialty label; accents and case are ignored.
    #[serde(default)]
    pub especialidad: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SlotsQuery {
    #[serde(default)]
    pub clinica: String,
    #[serde(default)]
    pub especialidad: String,
    #[serde(default)]
    pub profesional: String,
    /// Day to open in the widget calendar, `YYYY-MM-DD`.
    pub fecha: Option<String>,
    /// Also return slots marked as taken.
    #[serde(default)]
    pub incluir_ocupados: bool,
}

#[derive(Serialize, ToSchema)]
pub struct SpecialtiesResponse {
    pub success: bool,
    pub total: usize,
    pub especialidades: Vec<Specialty>,
}

#[derive(Serialize, ToSchema)]
pub struct PractitionersResponse {
    pub success: bool,
    pub total: usize,
    pub profesionales: Vec<Practitioner>,
}

#[derive(Serialize, ToSchema)]
pub struct SlotsResponse {
    pub success: bool,
    pub total: usize,
    pub horarios: Vec<TimeSlot>,
}

/// Body of every unsuccessful answer, soft failures included.
#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

pub struct ApiError(pub ScrapeError);

impl From<ScrapeError> for ApiError {
    fn from(err: ScrapeError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            ScrapeError::ElementNotFound(_) => StatusCode::OK,
            ScrapeError::Navigation { .. } => StatusCode::GATEWAY_TIMEOUT,
            ScrapeError::QueueClosed | ScrapeError::JobAborted(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {}", self.0);
        } else {
            warn!(status = status.as_u16(), "Request rejected: {}", self.0);
        }
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}

fn soft_failure(reason: String) -> Response {
    warn!("⚠️ Soft failure: {}", reason);
    (StatusCode::OK, Json(ErrorResponse::new(reason))).into_response()
}

/// List the specialties offered by a booking source.
#[utoipa::path(
    get,
    path = "/especialidades",
    params(SpecialtiesQuery),
    responses(
        (status = 200, description = "Specialty list, or success=false when the widget could not be walked", body = SpecialtiesResponse),
        (status = 400, description = "Unknown source or missing parameter", body = ErrorResponse),
        (status = 500, description = "Browser failure", body = ErrorResponse),
        (status = 504, description = "Source did not load", body = ErrorResponse)
    ),
    tag = "agenda"
)]
pub async fn list_specialties(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SpecialtiesQuery>,
) -> Result<Response, ApiError> {
    Ok(match state.service.specialties(&query.clinica).await? {
        WorkflowOutcome::Success(especialidades) => Json(SpecialtiesResponse {
            success: true,
            total: especialidades.len(),
            especialidades,
        })
        .into_response(),
        WorkflowOutcome::Failure(reason) => soft_failure(reason),
    })
}

/// List the practitioners of one specialty.
#[utoipa::path(
    get,
    path = "/profesionales",
    params(PractitionersQuery),
    responses(
        (status = 200, description = "Practitioner list, or success=false when the specialty was not found", body = PractitionersResponse),
        (status = 400, description = "Unknown source or missing parameter", body = ErrorResponse),
        (status = 500, description = "Browser failure", body = ErrorResponse),
        (status = 504, description = "Source did not load", body = ErrorResponse)
    ),
    tag = "agenda"
)]
pub async fn list_practitioners(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PractitionersQuery>,
) -> Result<Response, ApiError> {
    Ok(match state.service.practitioners(&query.clinica, &query.especialidad).await? {
        WorkflowOutcome::Success(profesionales) => Json(PractitionersResponse {
            success: true,
            total: profesionales.len(),
            profesionales,
        })
        .into_response(),
        WorkflowOutcome::Failure(reason) => soft_failure(reason),
    })
}

/// List the time slots of one practitioner.
#[utoipa::path(
    get,
    path = "/horarios",
    params(SlotsQuery),
    responses(
        (status = 200, description = "Slot list, or success=false when a step of the flow was not found", body = SlotsResponse),
        (status = 400, description = "Unknown source, missing or malformed parameter", body = ErrorResponse),
        (status = 500, description = "Browser failure", body = ErrorResponse),
        (status = 504, description = "Source did not load", body = ErrorResponse)
    ),
    tag = "agenda"
)]
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Response, ApiError> {
    let outcome = state
        .service
        .slots(
            &query.clinica,
            &query.especialidad,
            &query.profesional,
            query.fecha.as_deref(),
            query.incluir_ocupados,
        )
        .await?;
    Ok(match outcome {
        WorkflowOutcome::Success(horarios) => Json(SlotsResponse {
            success: true,
            total: horarios.len(),
            horarios,
        })
        .into_response(),
        WorkflowOutcome::Failure(reason) => soft_failure(reason),
    })
}

/// Process, browser, queue and cache status.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthReport)),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.service.health().await)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/especialidades", get(list_specialties))
        .route("/profesionales", get(list_practitioners))
        .route("/horarios", get(list_slots))
        .route("/health", get(health))
        .with_state(state)
}
