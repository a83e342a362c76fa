/*
    cancel.rs - Cooperative cancellation

    Cancellation is requested at any time and honored at the next
    suspension point: in-flight I/O finishes, no further step runs, and
    staged artifacts are rolled back by the owning operation.
*/

use tokio::sync::watch;

/// Handle for requesting and observing cancellation
#[derive(Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        CancelToken { tx, rx }
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                // Sender gone without cancelling; treat as never-cancelled
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_observed() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        // Resolves immediately once cancelled
        tokio::time::timeout(Duration::from_secs(1), token.cancelled()).await.unwrap();
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
