use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, info_span, Instrument};

use crate::queue::{QueueState, QueuedJob};

/// Single consumer of the scrape queue. Each job runs to completion inside
/// its own span; a panic only takes down that job. The cooldown applies after
/// every job whatever its outcome.
pub(crate) async fn run(mut jobs: mpsc::UnboundedReceiver<QueuedJob>, state: Arc<QueueState>, cooldown: Duration) {
    info!(cooldown_ms = cooldown.as_millis() as u64, "👷 Scrape worker started");

    while let Some(job) = jobs.recv().await {
        state.waiting.fetch_sub(1, Ordering::SeqCst);
        state.busy.store(true, Ordering::SeqCst);

        let span = info_span!("job", id = %job.id, label = %job.label);
        let started = Instant::now();
        let outcome = AssertUnwindSafe((job.run)())
            .catch_unwind()
            .instrument(span.clone())
            .await;

        span.in_scope(|| {
            if outcome.is_err() {
                error!("🔥 Job panicked, continuing with the next one");
            }
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "job settled");
        });

        state.processed.fetch_add(1, Ordering::SeqCst);
        state.busy.store(false, Ordering::SeqCst);

        if !cooldown.is_zero() {
            sleep(cooldown).await;
        }
    }

    info!("👷 Scrape worker stopped");
}
