//! Error types for the DAQ control layer.
//!
//! This module defines the primary error type, `DaqError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different failure modes of the acquisition
//! lifecycle.
//!
//! ## Error Taxonomy
//!
//! - **`InvalidTransition`**: a lifecycle command was attempted from a
//!   [`ConnectionState`] outside its valid-source set. The state machine is
//!   left unchanged.
//! - **`NotConnected`** / **`NotConfigured`**: a precondition check failed
//!   before any backend command was issued. These are distinct from
//!   `InvalidTransition`, which is raised by the transition table itself.
//! - **`Configuration`**: a `configure` or simulated `begin` could not
//!   resolve a usable events-or-duration value.
//! - **`Backend`**: the backend command itself failed. For `configure` the
//!   controller rolls the committed configuration back to none.
//! - **`AlreadyResolved`** / **`CommandFailed`** / **`WaitTimeout`**:
//!   completion-handle outcomes surfaced by [`CommandStatus`].
//!
//! [`ConnectionState`]: crate::state::ConnectionState
//! [`CommandStatus`]: crate::status::CommandStatus

use std::time::Duration;

use thiserror::Error;

use crate::state::{ConnectionState, TransitionCommand};

/// Convenience alias for results using the crate error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by the DAQ controller, transition table, and backends.
#[derive(Error, Debug)]
pub enum DaqError {
    /// A lifecycle command was attempted from a state outside its
    /// valid-source set. No state change occurred.
    #[error("invalid transition '{command}' from state {state}")]
    InvalidTransition {
        /// The command that was attempted.
        command: TransitionCommand,
        /// The state the machine was in when the command arrived.
        state: ConnectionState,
    },

    /// An operation requiring a live backend handle was attempted without
    /// one (and auto-connect, where applicable, did not succeed).
    #[error("DAQ is not connected")]
    NotConnected,

    /// An operation requiring a committed configuration was attempted with
    /// none present.
    #[error("DAQ is not configured")]
    NotConfigured,

    /// No usable events-or-duration value could be resolved.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The controller was constructed without a control backend.
    #[error("no DAQ control backend is available")]
    BackendUnavailable,

    /// A backend command failed. The underlying cause is preserved.
    #[error("backend command failed: {0}")]
    Backend(#[from] anyhow::Error),

    /// `resolve` was called on a completion handle that already holds an
    /// outcome. The first outcome wins.
    #[error("command status was already resolved")]
    AlreadyResolved,

    /// A background command resolved its completion handle as failed.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// A `wait` call gave up before the completion handle resolved. The
    /// underlying backend operation is not cancelled.
    #[error("timed out after {0:?} waiting for command completion")]
    WaitTimeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::InvalidTransition {
            command: TransitionCommand::Stop,
            state: ConnectionState::Connected,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition 'stop' from state Connected"
        );
    }

    #[test]
    fn test_backend_error_preserves_cause() {
        let err = DaqError::Backend(anyhow::anyhow!("socket closed"));
        assert!(err.to_string().contains("socket closed"));
    }
}
