use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::ScrapeError;
use crate::worker;

pub(crate) type JobFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub(crate) struct QueuedJob {
    pub id: Uuid,
    pub label: String,
    pub run: JobFn,
}

/// Counters shared between the submit side and the worker.
#[derive(Default)]
pub(crate) struct QueueState {
    pub waiting: AtomicUsize,
    pub busy: AtomicBool,
    pub processed: AtomicU64,
}

/// FIFO queue with a single consumer: exactly one job runs at a time and the
/// worker pauses for the cooldown after each job settles.
#[derive(Clone)]
pub struct SerialQueue {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>>,
    state: Arc<QueueState>,
}

/// Handle to the eventual result of one queued job.
pub struct JobTicket<T> {
    pub id: Uuid,
    result: oneshot::Receiver<Result<T, ScrapeError>>,
}

impl<T> JobTicket<T> {
    pub async fn wait(self) -> Result<T, ScrapeError> {
        self.result
            .await
            .unwrap_or_else(|_| Err(ScrapeError::JobAborted(format!("job {} ended without a result", self.id))))
    }
}

impl SerialQueue {
    /// Spawns the worker and returns the queue with the worker's handle.
    pub fn start(cooldown: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState::default());
        let handle = tokio::spawn(worker::run(rx, Arc::clone(&state), cooldown));
        let queue = Self {
            sender: Arc::new(Mutex::new(Some(tx))),
            state,
        };
        (queue, handle)
    }

    /// Appends a job. Jobs run in the order `enqueue` was called.
    pub fn enqueue<T, F, Fut>(&self, label: impl Into<String>, job: F) -> Result<JobTicket<T>, ScrapeError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ScrapeError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let run: JobFn = Box::new(move || {
            Box::pin(async move {
                let result = job().await;
                let _ = tx.send(result);
            })
        });

        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(ScrapeError::QueueClosed)?;
        self.state.waiting.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedJob {
            id,
            label: label.into(),
            run,
        };
        if sender.send(queued).is_err() {
            self.state.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(ScrapeError::QueueClosed);
        }
        Ok(JobTicket { id, result: rx })
    }

    /// Enqueues and waits for the job to settle.
    pub async fn submit<T, F, Fut>(&self, label: impl Into<String>, job: F) -> Result<T, ScrapeError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ScrapeError>> + Send + 'static,
    {
        self.enqueue(label, job)?.wait().await
    }

    /// Jobs waiting behind the running one.
    pub fn depth(&self) -> usize {
        self.state.waiting.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> u64 {
        self.state.processed.load(Ordering::SeqCst)
    }

    /// Stops accepting jobs. Already queued jobs still run.
    pub fn close(&self) {
        self.sender.lock().take();
    }
}
