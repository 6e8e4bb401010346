//! Collection of per-file results into a [`TransferSummary`].
//!
//! The result channel is sized to the number of tasks, so a worker's send
//! never waits on the consumer. The consumer only starts draining once every
//! worker has finished.

use bucket_sync_models::{TransferResult, TransferSummary};
use tokio::sync::mpsc;

/// Sending half handed to each worker.
pub type ResultSender = mpsc::Sender<TransferResult>;

/// Receiving half that builds the summary.
#[derive(Debug)]
pub struct Aggregator {
    rx: mpsc::Receiver<TransferResult>,
    expected: usize,
}

/// Creates a result channel able to buffer `expected` results without
/// blocking any sender.
#[must_use]
pub fn channel(expected: usize) -> (ResultSender, Aggregator) {
    let (tx, rx) = mpsc::channel(expected.max(1));
    (tx, Aggregator { rx, expected })
}

impl Aggregator {
    /// Drains every result and builds the summary.
    ///
    /// Waits until all senders are dropped, so it must only be called after
    /// every worker has completed and the caller has dropped its own sender.
    pub async fn finish(mut self) -> TransferSummary {
        let mut results = Vec::with_capacity(self.expected);
        while let Some(result) = self.rx.recv().await {
            results.push(result);
        }

        if results.len() != self.expected {
            log::error!(
                "Expected {} transfer results but collected {}",
                self.expected,
                results.len()
            );
        }

        TransferSummary::from_results(results)
    }
}
