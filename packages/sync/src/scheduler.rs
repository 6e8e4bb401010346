//! Gate-bounded fan-out of per-file transfer tasks.
//!
//! Every item of a batch gets its own tokio task immediately, but a task
//! must hold a permit from the admission gate (a [`Semaphore`]) while it does
//! any I/O, so at most `concurrency` transfers run at once. Each task emits
//! exactly one [`TransferResult`] into a channel sized to the batch, and the
//! [`Aggregator`](crate::aggregate::Aggregator) drains it once every task has
//! finished.

use std::future::Future;
use std::sync::Arc;

use bucket_sync_models::{TransferResult, TransferSummary, TransferTask};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::aggregate;
use crate::progress::{ProgressCallback, null_progress};

/// Per-file error message for work abandoned on cancellation.
pub const CANCELLED: &str = "cancelled";

/// Handle given to each worker for cancellable I/O.
#[derive(Debug, Clone)]
pub struct TaskContext {
    cancel: CancellationToken,
}

impl TaskContext {
    /// Runs `fut` unless the batch is cancelled first.
    ///
    /// Returns `None` if cancellation won. A future that already completed
    /// is never discarded.
    pub async fn cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            output = fut => Some(output),
        }
    }

    /// Whether the batch has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Runs batches of transfers under a fixed-size admission gate.
pub struct Scheduler {
    concurrency: usize,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressCallback>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("concurrency", &self.concurrency)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler allowing `concurrency` transfers in flight.
    /// Zero is treated as one.
    #[must_use]
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
            progress: null_progress(),
        }
    }

    /// Reports per-file completion to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Size of the admission gate.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `work` once per task and returns the aggregated summary.
    ///
    /// All tasks are spawned up front and wait on the gate. A failure in one
    /// task never affects another. Results appear in completion order.
    pub async fn run<F, Fut>(&self, tasks: Vec<TransferTask>, work: F) -> TransferSummary
    where
        F: Fn(TransferTask, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransferResult> + Send + 'static,
    {
        self.run_with_rejected(tasks, Vec::new(), work).await
    }

    /// Like [`Self::run`], but also counts `rejected`: files that failed
    /// before a task could be built for them. They are reported ahead of
    /// every task result.
    pub async fn run_with_rejected<F, Fut>(
        &self,
        tasks: Vec<TransferTask>,
        rejected: Vec<TransferResult>,
        work: F,
    ) -> TransferSummary
    where
        F: Fn(TransferTask, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransferResult> + Send + 'static,
    {
        let total = tasks.len() + rejected.len();
        self.progress.set_total(total as u64);

        let gate = Arc::new(Semaphore::new(self.concurrency));
        let work = Arc::new(work);
        let (tx, aggregator) = aggregate::channel(total);

        for result in rejected {
            if tx.send(result).await.is_err() {
                log::error!("Result channel closed before all transfers finished");
            }
            self.progress.inc(1);
        }

        let mut handles = Vec::with_capacity(total);
        for task in tasks {
            let described = (task.local_path.clone(), task.object_key.clone());
            let gate = gate.clone();
            let work = work.clone();
            let tx = tx.clone();
            let progress = self.progress.clone();
            let ctx = TaskContext {
                cancel: self.cancel.clone(),
            };

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => None,
                    permit = gate.acquire_owned() => permit.ok(),
                };

                let result = match permit {
                    Some(_permit) => (*work)(task, ctx).await,
                    None => TransferResult::failed(task.local_path, task.object_key, CANCELLED),
                };

                if tx.send(result).await.is_err() {
                    log::error!("Result channel closed before all transfers finished");
                }
                progress.inc(1);
            });
            handles.push((described, handle));
        }

        for ((file_path, object_key), handle) in handles {
            if let Err(e) = handle.await {
                log::error!("Transfer task for {} failed: {e}", file_path.display());
                let result =
                    TransferResult::failed(file_path, object_key, format!("worker failed: {e}"));
                if tx.send(result).await.is_err() {
                    log::error!("Result channel closed before all transfers finished");
                }
                self.progress.inc(1);
            }
        }
        drop(tx);

        let summary = aggregator.finish().await;
        self.progress.finish(summary.to_string());
        summary
    }
}
