/*
    operation.rs - Generic remote-operation runner

    Every multi-step remote interaction (registration, listing, upload,
    download, deletion, vacuum) runs through one of these. Each step is
    retried up to the policy ceiling for transient failures; fatal errors
    abort; cancellation is honored before each attempt and during backoff;
    a paused operation waits for external input (e.g. a password).

    Artifacts written to the medium are staged by path so a failed or
    cancelled operation can delete everything it created.
*/

use super::cancel::CancelToken;
use super::progress::{Outcome, ProgressChannel, ProgressEvent};
use super::retry::RetryPolicy;
use crate::errors::{SyncError, SyncResult};
use crate::remote::Transport;
use std::future::Future;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Lifecycle of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::Cancelled
        )
    }
}

/// Runner for one multi-step remote operation
pub struct Operation {
    name: String,
    state: OperationState,
    policy: RetryPolicy,
    cancel: CancelToken,
    progress: ProgressChannel,
    staged: Vec<String>,
}

impl Operation {
    pub fn new(
        name: impl Into<String>,
        policy: RetryPolicy,
        cancel: CancelToken,
        progress: ProgressChannel,
    ) -> Self {
        Operation {
            name: name.into(),
            state: OperationState::NotStarted,
            policy,
            cancel,
            progress,
            staged: Vec::new(),
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a remote artifact this operation created, for rollback
    pub fn stage(&mut self, path: impl Into<String>) {
        self.staged.push(path.into());
    }

    /// An artifact reached its committed state; rollback must keep it
    pub fn commit_staged(&mut self) {
        self.staged.clear();
    }

    /// Delete every staged artifact, most recent first
    pub async fn rollback(&mut self, transport: &dyn Transport) {
        while let Some(path) = self.staged.pop() {
            if let Err(e) = transport.delete(&path).await {
                warn!(operation = %self.name, path = %path, error = %e, "rollback delete failed");
            }
        }
    }

    fn enter_in_progress(&mut self) -> SyncResult<()> {
        match self.state {
            OperationState::NotStarted => {
                self.state = OperationState::InProgress;
                self.progress.emit(ProgressEvent::Started { operation: self.name.clone() });
                Ok(())
            }
            OperationState::InProgress | OperationState::Paused => {
                self.state = OperationState::InProgress;
                Ok(())
            }
            terminal => Err(SyncError::InvalidState(format!(
                "operation {} already {:?}",
                self.name, terminal
            ))),
        }
    }

    fn check_cancelled(&mut self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            self.state = OperationState::Cancelled;
            self.progress.emit(ProgressEvent::Finished {
                operation: self.name.clone(),
                outcome: Outcome::Cancelled,
            });
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Run one step, retrying transient failures up to the policy ceiling
    ///
    /// The closure is re-invoked for each attempt. A per-attempt timeout
    /// counts as a transient failure. In-flight I/O is never aborted;
    /// cancellation takes effect before the next attempt or during
    /// backoff.
    pub async fn run_step<T, F, Fut>(&mut self, step: &str, mut f: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        self.enter_in_progress()?;

        let mut attempt = 1u32;
        loop {
            self.check_cancelled()?;
            self.progress.emit(ProgressEvent::Step {
                operation: self.name.clone(),
                step: step.to_string(),
                attempt,
            });

            let outcome = match tokio::time::timeout(self.policy.step_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::TransientIo(format!("step '{}' timed out", step))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        operation = %self.name,
                        step,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {}
                    }
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    let exhausted = SyncError::RetryExhausted {
                        step: step.to_string(),
                        attempts: attempt,
                        last: err.to_string(),
                    };
                    self.fail(&exhausted);
                    return Err(exhausted);
                }
                Err(err) => {
                    self.fail(&err);
                    return Err(err);
                }
            }
        }
    }

    /// Park the operation until external input arrives (or cancellation)
    pub async fn await_input<T>(
        &mut self,
        reason: &str,
        input: oneshot::Receiver<T>,
    ) -> SyncResult<T> {
        self.enter_in_progress()?;
        self.state = OperationState::Paused;
        self.progress.emit(ProgressEvent::Paused {
            operation: self.name.clone(),
            reason: reason.to_string(),
        });

        tokio::select! {
            received = input => {
                self.state = OperationState::InProgress;
                received.map_err(|_| {
                    let err = SyncError::AuthenticationRequired(format!(
                        "input for '{}' never supplied", reason
                    ));
                    self.fail(&err);
                    err
                })
            }
            _ = self.cancel.cancelled() => {
                self.state = OperationState::Cancelled;
                self.progress.emit(ProgressEvent::Finished {
                    operation: self.name.clone(),
                    outcome: Outcome::Cancelled,
                });
                Err(SyncError::Cancelled)
            }
        }
    }

    /// Mark the operation successfully finished
    pub fn complete(&mut self) {
        if !self.state.is_terminal() {
            self.state = OperationState::Completed;
            self.staged.clear();
            self.progress.emit(ProgressEvent::Finished {
                operation: self.name.clone(),
                outcome: Outcome::Success,
            });
        }
    }

    fn fail(&mut self, err: &SyncError) {
        if !self.state.is_terminal() {
            self.state = OperationState::Failed;
            self.progress.emit(ProgressEvent::Finished {
                operation: self.name.clone(),
                outcome: Outcome::Failure(err.to_string()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryTransport;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            step_timeout: Duration::from_secs(1),
        }
    }

    fn operation(name: &str) -> Operation {
        Operation::new(name, fast_policy(), CancelToken::new(), ProgressChannel::new())
    }

    #[tokio::test]
    async fn test_step_succeeds_first_try() {
        let mut op = operation("t");
        let result = op.run_step("only", || async { Ok::<_, SyncError>(42) }).await.unwrap();
        assert_eq!(result, 42);
        op.complete();
        assert_eq!(op.state(), OperationState::Completed);
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let mut op = operation("t");
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = op
            .run_step("flaky", move || {
                let calls = calls2.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(SyncError::TransientIo("flake".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_ceiling_surfaces_exhaustion() {
        let mut op = operation("t");
        let err = op
            .run_step("hopeless", || async {
                Err::<(), _>(SyncError::TransientIo("down".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(op.state(), OperationState::Failed);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_immediately() {
        let mut op = operation("t");
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let err = op
            .run_step("fatal", move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(SyncError::Storage("corrupt disk".to_string()))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Storage(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(op.state(), OperationState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_before_step() {
        let cancel = CancelToken::new();
        let mut op = Operation::new("t", fast_policy(), cancel.clone(), ProgressChannel::new());
        cancel.cancel();

        let err = op.run_step("never", || async { Ok::<_, SyncError>(()) }).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(op.state(), OperationState::Cancelled);
    }

    #[tokio::test]
    async fn test_rollback_deletes_staged_artifacts() {
        let medium = MemoryTransport::new();
        medium.write("app/a", b"1").await.unwrap();
        medium.write("app/b", b"2").await.unwrap();

        let mut op = operation("t");
        op.stage("app/a");
        op.stage("app/b");
        op.rollback(&medium).await;

        assert!(!medium.exists("app/a").await.unwrap());
        assert!(!medium.exists("app/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_pause_and_resume_with_input() {
        let mut op = operation("t");
        let (tx, rx) = oneshot::channel();

        let progress = ProgressChannel::new();
        let _ = progress;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send("secret".to_string());
        });

        let password = op.await_input("encryption password", rx).await.unwrap();
        assert_eq!(password, "secret");
        assert_eq!(op.state(), OperationState::InProgress);
    }

    #[tokio::test]
    async fn test_pause_cancelled() {
        let cancel = CancelToken::new();
        let mut op = Operation::new("t", fast_policy(), cancel.clone(), ProgressChannel::new());
        let (_tx, rx) = oneshot::channel::<String>();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = op.await_input("password", rx).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(op.state(), OperationState::Cancelled);
    }

    #[tokio::test]
    async fn test_terminal_state_rejects_new_steps() {
        let mut op = operation("t");
        op.complete();
        let err = op.run_step("late", || async { Ok::<_, SyncError>(()) }).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)));
    }
}
