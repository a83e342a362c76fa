/*
    progress.rs - Operation progress notifications

    Completion and progress are reported through a broadcast channel, not
    return values; zero or more listeners may subscribe and drop out at
    any time without affecting the operation.
*/

use tokio::sync::broadcast;

/// Terminal outcome of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
    Cancelled,
}

/// One progress notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The operation left NotStarted
    Started { operation: String },

    /// A step began (possibly a retry of a previous attempt)
    Step { operation: String, step: String, attempt: u32 },

    /// The operation is waiting for external input
    Paused { operation: String, reason: String },

    /// The operation reached a terminal state
    Finished { operation: String, outcome: Outcome },
}

/// Fan-out of progress events to any number of listeners
#[derive(Clone)]
pub struct ProgressChannel {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        ProgressChannel { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Send an event; silently dropped when nobody is listening
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_and_emit() {
        let channel = ProgressChannel::new();
        let mut rx = channel.subscribe();

        channel.emit(ProgressEvent::Started { operation: "sync".to_string() });
        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::Started { operation: "sync".to_string() }
        );
    }

    #[test]
    fn test_emit_without_listeners_is_fine() {
        let channel = ProgressChannel::new();
        channel.emit(ProgressEvent::Finished {
            operation: "sync".to_string(),
            outcome: Outcome::Success,
        });
    }
}
