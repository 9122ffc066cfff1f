use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::service::BookingService;

/// Drops expired cache entries. Reads already treat them as misses; this only
/// bounds memory.
pub fn sweep_cache(service: &BookingService) -> usize {
    let removed = service.cache().purge_expired();
    if removed > 0 {
        debug!(removed, remaining = service.cache().len(), "🧹 Swept expired cache entries");
    }
    removed
}

pub async fn start_scheduler(service: Arc<BookingService>) -> anyhow::Result<JobScheduler> {
    let sched = JobScheduler::new().await?;

    // Heartbeat every 5 minutes
    let heartbeat_service = Arc::clone(&service);
    sched
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let service = Arc::clone(&heartbeat_service);
            Box::pin(async move {
                let health = service.health().await;
                info!(
                    uptime_secs = health.uptime_secs,
                    completed = health.completed,
                    browser_live = health.browser_live,
                    queue_depth = health.queue_depth,
                    cache_entries = health.cache_entries,
                    "⏰ [Scheduler] Heartbeat"
                );
            })
        })?)
        .await?;

    let sweep_service = Arc::clone(&service);
    sched
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let service = Arc::clone(&sweep_service);
            Box::pin(async move {
                sweep_cache(&service);
            })
        })?)
        .await?;

    sched.start().await?;
    info!("✅ Maintenance scheduler started");

    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeLauncher, FakeSite};
    use crate::browser::SessionManager;
    use crate::cache::ResponseCache;
    use crate::config::{CacheConfig, FlowConfig, SourceRegistry};
    use crate::queue::SerialQueue;
    use crate::workflows::WorkflowKind;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweep_cache_removes_only_expired() {
        let session = Arc::new(SessionManager::new(Arc::new(FakeLauncher::new(FakeSite::blank())), 8));
        let (queue, _worker) = SerialQueue::start(Duration::ZERO);
        let service = BookingService::new(
            SourceRegistry::default(),
            ResponseCache::new(CacheConfig::default()),
            queue,
            session,
            FlowConfig::default(),
        );

        let cache = service.cache();
        cache.set_with_ttl(WorkflowKind::Slots, "old", json!([]), Duration::from_millis(10));
        cache.set(WorkflowKind::Specialties, "fresh", json!([]));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sweep_cache(&service), 1);
        assert_eq!(service.cache().len(), 1);
        assert_eq!(sweep_cache(&service), 0);
    }
}
