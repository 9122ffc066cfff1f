mod api;
mod browser;
mod cache;
mod config;
mod error;
mod extract;
mod navigator;
mod normalize;
mod queue;
mod scheduler;
mod service;
mod worker;
mod workflows;

use axum::Router;
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::browser::chrome::ChromeLauncher;
use crate::browser::SessionManager;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::queue::SerialQueue;
use crate::service::BookingService;

/// How long queued scrapes may keep running after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(OpenApi)]
#[openapi(
    paths(
        api::list_specialties,
        api::list_practitioners,
        api::list_slots,
        api::health
    ),
    components(
        schemas(
            api::SpecialtiesResponse,
            api::PractitionersResponse,
            api::SlotsResponse,
            api::ErrorResponse,
            extract::Specialty,
            extract::Practitioner,
            extract::TimeSlot,
            extract::SlotState,
            service::HealthReport
        )
    ),
    tags(
        (name = "agenda", description = "Booking widget scraping API"),
        (name = "system", description = "Service status")
    )
)]
struct ApiDoc;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("🛑 Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agenda_crawler=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        sources = config.sources.len(),
        recycle_threshold = config.recycle_threshold,
        cooldown_ms = config.queue_cooldown.as_millis() as u64,
        "🔧 Configuration loaded"
    );

    let launcher = Arc::new(ChromeLauncher::new(config.chrome.clone(), config.flow.step_timeout));
    let session = Arc::new(SessionManager::new(launcher, config.recycle_threshold));
    let (queue, worker) = SerialQueue::start(config.queue_cooldown);
    let service = Arc::new(BookingService::new(
        config.sources,
        ResponseCache::new(config.cache),
        queue,
        session,
        config.flow,
    ));

    let mut scheduler = match scheduler::start_scheduler(Arc::clone(&service)).await {
        Ok(sched) => Some(sched),
        Err(e) => {
            error!("🔥 Scheduler Error: {}", e);
            None
        }
    };

    let state = Arc::new(api::AppState {
        service: Arc::clone(&service),
    });
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sched) = scheduler.as_mut() {
        if let Err(e) = sched.shutdown().await {
            warn!("Scheduler did not stop cleanly: {}", e);
        }
    }
    service.close_queue();
    if tokio::time::timeout(DRAIN_TIMEOUT, worker).await.is_err() {
        warn!("Queued scrapes did not finish within {:?}", DRAIN_TIMEOUT);
    }
    service.close_browser().await;
    info!("👋 Bye");

    Ok(())
}
