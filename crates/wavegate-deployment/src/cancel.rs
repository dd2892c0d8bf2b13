//! Run cancellation

use std::sync::Arc;

use tokio::sync::watch;

/// How a run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    /// Stop issuing applies; leave applied units as they are.
    Stop,
    /// Stop, then restore the wave in flight.
    StopAndRollback,
}

/// Shared cancel switch for a run. Clones observe the same switch.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<Option<CancelMode>>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.request(CancelMode::Stop);
    }

    pub fn cancel_with_rollback(&self) {
        self.request(CancelMode::StopAndRollback);
    }

    // A later request can escalate Stop to StopAndRollback, never the reverse
    fn request(&self, mode: CancelMode) {
        self.tx.send_modify(|current| {
            if *current != Some(CancelMode::StopAndRollback) {
                *current = Some(mode);
            }
        });
    }

    pub fn mode(&self) -> Option<CancelMode> {
        *self.tx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.mode().is_some()
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(Option::is_some).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rollback_request_is_sticky() {
        let handle = CancelHandle::new();
        assert!(!handle.is_cancelled());

        handle.cancel_with_rollback();
        handle.cancel();
        assert_eq!(handle.mode(), Some(CancelMode::StopAndRollback));
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_wake_on_cancel() {
        let handle = CancelHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        handle.cancel();
        waiter.await.unwrap();
    }
}
