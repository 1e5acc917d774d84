use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::TransferKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub kind: TransferKind,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
}

impl ProgressUpdate {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Receives progress of one transfer from its reporter task.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, update: ProgressUpdate);

    /// Called once after every chunk task has finished.
    fn on_finish(&self, _update: ProgressUpdate) {}
}

/// Discards all progress.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _update: ProgressUpdate) {}
}

/// Spawns the single task that sums chunk byte counts sent on the returned
/// channel. It ends when every sender is dropped and yields the grand total.
pub(crate) fn spawn_reporter(
    kind: TransferKind,
    total_bytes: u64,
    observer: Arc<dyn ProgressObserver>,
) -> (mpsc::UnboundedSender<u64>, JoinHandle<u64>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<u64>();

    let handle = tokio::spawn(async move {
        let mut transferred_bytes = 0u64;
        while let Some(bytes) = rx.recv().await {
            transferred_bytes += bytes;
            observer.on_progress(ProgressUpdate {
                kind,
                transferred_bytes,
                total_bytes,
            });
        }
        observer.on_finish(ProgressUpdate {
            kind,
            transferred_bytes,
            total_bytes,
        });
        transferred_bytes
    });

    (tx, handle)
}
