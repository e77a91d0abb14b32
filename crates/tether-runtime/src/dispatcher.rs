//! Serialization point for model mutations
//!
//! Every inbound frame, session bind/unbind and bridged write runs as a job
//! on one task, in submission order. I/O happens elsewhere and hands its
//! results over through [`Dispatcher::submit`], which waits for queue space
//! so a fast peer is slowed down at the transport instead of piling up here.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tether_core::{TetherError, TetherResult};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Job = Box<dyn FnOnce() + Send>;

/// Jobs that may wait before [`Dispatcher::post`] reports the queue busy
pub const QUEUE_DEPTH: usize = 1024;

/// Cloneable handle to the dispatch task
///
/// The task stops once every handle is dropped. Jobs must not block waiting
/// on other jobs (a synchronous call made from a job can never see its
/// response).
#[derive(Clone, Debug)]
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
    executed: Arc<AtomicU64>,
}

impl Dispatcher {
    /// Start the dispatch task on the current runtime
    pub fn spawn() -> (Dispatcher, JoinHandle<()>) {
        Self::with_capacity(QUEUE_DEPTH)
    }

    pub fn with_capacity(depth: usize) -> (Dispatcher, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(depth.max(1));
        let executed = Arc::new(AtomicU64::new(0));
        let counter = executed.clone();

        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("dispatched job panicked");
                }
                counter.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!("dispatcher stopped");
        });

        (Dispatcher { tx, executed }, task)
    }

    /// Queue a job without waiting for it. Fails rather than blocks when
    /// the queue is full.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> TetherResult<()> {
        self.tx.try_send(Box::new(job)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TetherError::DispatcherBusy,
            mpsc::error::TrySendError::Closed(_) => TetherError::DispatcherUnavailable,
        })
    }

    /// Queue a job, waiting for space if the queue is full
    pub async fn submit(&self, job: impl FnOnce() + Send + 'static) -> TetherResult<()> {
        self.tx
            .send(Box::new(job))
            .await
            .map_err(|_| TetherError::DispatcherUnavailable)
    }

    /// Run `job` on the dispatcher and wait for its result
    pub async fn invoke<R: Send + 'static>(
        &self,
        job: impl FnOnce() -> R + Send + 'static,
    ) -> TetherResult<R> {
        let (tx, rx) = oneshot::channel();
        self.submit(move || {
            let _ = tx.send(job());
        })
        .await?;
        rx.await.map_err(|_| TetherError::DispatcherUnavailable)
    }

    /// Wait until every job queued before this call has run
    pub async fn flush(&self) -> TetherResult<()> {
        self.invoke(|| ()).await
    }

    /// Jobs run so far
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}
