use crate::core::{Result, SyncError};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs remote calls with a fixed number in flight, independent of how many
/// are queued.
pub struct WorkerPool {
    width: usize,
    inflight: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            width,
            inflight: Arc::new(Semaphore::new(width)),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Drives every task to completion and returns their results in input
    /// order. A failing task never cancels its siblings.
    pub async fn run<T, F>(&self, tasks: impl IntoIterator<Item = F>) -> Vec<Result<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let inflight = &self.inflight;
        join_all(tasks.into_iter().map(|task| async move {
            let _permit = inflight
                .acquire()
                .await
                .map_err(|_| SyncError::Internal("worker pool closed".into()))?;
            task.await
        }))
        .await
    }
}
