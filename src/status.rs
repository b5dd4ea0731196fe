//! Completion handles for asynchronous DAQ commands.
//!
//! `kickoff` and `complete` return immediately with a [`CommandStatus`]; a
//! background worker resolves the status exactly once when the backend call
//! returns. Any number of waiters may observe the outcome, before or after
//! resolution, and a `wait` with a timeout reports the timeout distinctly
//! instead of hanging.
//!
//! Built on a `tokio::sync::watch` channel: the handle owns the sender, and
//! every waiter subscribes its own receiver, so the stored outcome is
//! replayable rather than one-shot.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::{DaqError, DaqResult};

/// Terminal outcome of a background command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The backend call returned control successfully.
    Success,
    /// The backend call failed; the message describes why.
    Failure(String),
}

impl CommandOutcome {
    /// True for [`CommandOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success)
    }
}

/// A completion handle for one in-flight background command.
///
/// Cloning the status produces another handle to the same operation; the
/// worker typically keeps one clone to resolve while the caller keeps the
/// original to wait on.
#[derive(Clone, Debug)]
pub struct CommandStatus {
    slot: watch::Sender<Option<CommandOutcome>>,
}

impl CommandStatus {
    /// Create an unresolved status.
    pub fn new() -> Self {
        let (slot, _rx) = watch::channel(None);
        Self { slot }
    }

    /// Record the terminal outcome.
    ///
    /// The first resolution wins; resolving an already-resolved status
    /// returns [`DaqError::AlreadyResolved`] and leaves the stored outcome
    /// untouched.
    pub fn resolve(&self, outcome: CommandOutcome) -> DaqResult<()> {
        let stored = self.slot.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome);
                true
            } else {
                false
            }
        });
        if stored {
            Ok(())
        } else {
            Err(DaqError::AlreadyResolved)
        }
    }

    /// Resolve as successful.
    pub fn succeed(&self) -> DaqResult<()> {
        self.resolve(CommandOutcome::Success)
    }

    /// Resolve as failed with a reason.
    pub fn fail(&self, reason: impl Into<String>) -> DaqResult<()> {
        self.resolve(CommandOutcome::Failure(reason.into()))
    }

    /// The stored outcome, if resolved.
    pub fn outcome(&self) -> Option<CommandOutcome> {
        self.slot.borrow().clone()
    }

    /// Whether the status has resolved.
    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Wait until the status resolves, or until `timeout` elapses.
    ///
    /// Returns `Ok(())` for a successful outcome,
    /// [`DaqError::CommandFailed`] for a failed one, and
    /// [`DaqError::WaitTimeout`] if the timeout elapsed first. Waiting on an
    /// already-resolved status returns immediately with the stored outcome;
    /// concurrent waiters all observe the same outcome.
    pub async fn wait(&self, timeout: Option<Duration>) -> DaqResult<()> {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.resolved()).await {
                Ok(result) => result.and_then(|_| self.surface_outcome()),
                Err(_) => Err(DaqError::WaitTimeout(limit)),
            },
            None => {
                self.resolved().await?;
                self.surface_outcome()
            }
        }
    }

    /// Suspend until an outcome is stored.
    async fn resolved(&self) -> DaqResult<()> {
        let mut rx = self.slot.subscribe();
        rx.wait_for(|slot| slot.is_some())
            .await
            .map(|_| ())
            .map_err(|_| DaqError::CommandFailed("status channel closed".to_string()))
    }

    /// Translate the stored outcome into a result for the waiter.
    fn surface_outcome(&self) -> DaqResult<()> {
        match self.outcome() {
            Some(CommandOutcome::Success) => Ok(()),
            Some(CommandOutcome::Failure(reason)) => Err(DaqError::CommandFailed(reason)),
            None => Err(DaqError::CommandFailed(
                "status observed without an outcome".to_string(),
            )),
        }
    }
}

impl Default for CommandStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_after_resolution_returns_immediately() {
        let status = CommandStatus::new();
        status.succeed().unwrap();
        assert!(status.is_resolved());
        status.wait(None).await.unwrap();
        // Replayable, not one-shot.
        status.wait(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_unblocks_on_resolution_from_worker() {
        let status = CommandStatus::new();
        let worker = status.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            worker.succeed().unwrap();
        });
        status.wait(None).await.unwrap();
        assert_eq!(status.outcome(), Some(CommandOutcome::Success));
    }

    #[tokio::test]
    async fn test_failure_surfaces_to_waiter() {
        let status = CommandStatus::new();
        status.fail("backend begin refused").unwrap();
        let err = status.wait(None).await.unwrap_err();
        match err {
            DaqError::CommandFailed(reason) => assert!(reason.contains("begin refused")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_double_resolution_is_an_error() {
        let status = CommandStatus::new();
        status.succeed().unwrap();
        let err = status.fail("too late").unwrap_err();
        assert!(matches!(err, DaqError::AlreadyResolved));
        // First outcome wins.
        assert_eq!(status.outcome(), Some(CommandOutcome::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_is_distinguishable() {
        let status = CommandStatus::new();
        let worker = status.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = worker.succeed();
        });
        let err = status.wait(Some(Duration::from_millis(10))).await.unwrap_err();
        assert!(matches!(err, DaqError::WaitTimeout(_)));
    }

    #[tokio::test]
    async fn test_all_waiters_observe_the_same_outcome() {
        let status = CommandStatus::new();
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let status = status.clone();
            waiters.push(tokio::spawn(async move { status.wait(None).await }));
        }
        status.succeed().unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
    }
}
