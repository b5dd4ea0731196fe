//! Acquisition lifecycle states and the guarded transition table.
//!
//! The DAQ control link exposes a five-state lifecycle. Every lifecycle
//! command is governed by a single transition table: each command partitions
//! the state set into *ignore* states (the command is a harmless no-op),
//! *valid source* states (the command applies and moves to the target
//! state), and everything else (the command is an error and nothing
//! changes). The table is the single source of truth; nothing else in the
//! crate mutates a connection state except through [`TransitionTable::attempt`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DaqError, DaqResult};

/// Lifecycle state of the DAQ control link.
///
/// The numeric indices match the wire protocol of the control link, where
/// `state()` reports an integer index into this ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No control handle bound.
    Disconnected = 0,
    /// Control handle bound, nothing configured yet.
    Connected = 1,
    /// A run configuration has been committed.
    Configured = 2,
    /// A run is open but not currently acquiring.
    Open = 3,
    /// Actively acquiring data.
    Running = 4,
}

impl ConnectionState {
    /// All states, in wire-index order.
    pub const ALL: [ConnectionState; 5] = [
        ConnectionState::Disconnected,
        ConnectionState::Connected,
        ConnectionState::Configured,
        ConnectionState::Open,
        ConnectionState::Running,
    ];

    /// The wire-protocol index of this state.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up a state by its wire-protocol index.
    pub fn from_index(index: usize) -> Option<ConnectionState> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connected => "Connected",
            ConnectionState::Configured => "Configured",
            ConnectionState::Open => "Open",
            ConnectionState::Running => "Running",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle commands governed by the transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionCommand {
    /// Bind the control handle.
    Connect,
    /// Release the control handle.
    Disconnect,
    /// Commit a run configuration.
    Configure,
    /// Start acquiring.
    Begin,
    /// Stop acquiring, leaving the run open.
    Stop,
    /// Close the run, landing back at Configured.
    EndRun,
}

impl fmt::Display for TransitionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionCommand::Connect => "connect",
            TransitionCommand::Disconnect => "disconnect",
            TransitionCommand::Configure => "configure",
            TransitionCommand::Begin => "begin",
            TransitionCommand::Stop => "stop",
            TransitionCommand::EndRun => "endrun",
        };
        write!(f, "{}", name)
    }
}

/// One row of the transition table.
#[derive(Debug)]
pub struct TransitionRule {
    /// States in which the command is silently ignored.
    pub ignore: &'static [ConnectionState],
    /// States from which the command validly applies.
    pub valid_from: &'static [ConnectionState],
    /// State reached when the command applies.
    pub target: ConnectionState,
}

/// The guarded transition table for all lifecycle commands.
pub struct TransitionTable;

impl TransitionTable {
    /// The rule governing `command`.
    pub fn rule(command: TransitionCommand) -> &'static TransitionRule {
        use ConnectionState::*;
        match command {
            TransitionCommand::Connect => &TransitionRule {
                ignore: &[Connected, Configured, Open, Running],
                valid_from: &[Disconnected],
                target: Connected,
            },
            TransitionCommand::Disconnect => &TransitionRule {
                ignore: &[],
                valid_from: &[Disconnected, Connected, Configured],
                target: Disconnected,
            },
            TransitionCommand::Configure => &TransitionRule {
                ignore: &[],
                valid_from: &[Connected, Configured],
                target: Configured,
            },
            TransitionCommand::Begin => &TransitionRule {
                ignore: &[],
                valid_from: &[Configured, Open],
                target: Running,
            },
            TransitionCommand::Stop => &TransitionRule {
                ignore: &[Disconnected, Connected, Configured, Open],
                valid_from: &[Running],
                target: Open,
            },
            TransitionCommand::EndRun => &TransitionRule {
                ignore: &[Disconnected, Connected, Configured],
                valid_from: &[Open, Running],
                target: Configured,
            },
        }
    }

    /// Attempt `command` from `current`.
    ///
    /// Returns `(current, false)` when the command is ignored from this
    /// state, `(target, true)` when it applies, and
    /// [`DaqError::InvalidTransition`] otherwise. On error no state change
    /// has occurred.
    pub fn attempt(
        current: ConnectionState,
        command: TransitionCommand,
    ) -> DaqResult<(ConnectionState, bool)> {
        let rule = Self::rule(command);
        if rule.ignore.contains(&current) {
            Ok((current, false))
        } else if rule.valid_from.contains(&current) {
            Ok((rule.target, true))
        } else {
            Err(DaqError::InvalidTransition {
                command,
                state: current,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_COMMANDS: [TransitionCommand; 6] = [
        TransitionCommand::Connect,
        TransitionCommand::Disconnect,
        TransitionCommand::Configure,
        TransitionCommand::Begin,
        TransitionCommand::Stop,
        TransitionCommand::EndRun,
    ];

    #[test]
    fn test_state_indices_match_wire_protocol() {
        assert_eq!(ConnectionState::Disconnected.index(), 0);
        assert_eq!(ConnectionState::Running.index(), 4);
        assert_eq!(
            ConnectionState::from_index(3),
            Some(ConnectionState::Open)
        );
        assert_eq!(ConnectionState::from_index(5), None);
    }

    #[test]
    fn test_partitions_never_overlap() {
        // A state may be an ignore state or a valid source for a given
        // command, never both.
        for command in ALL_COMMANDS {
            let rule = TransitionTable::rule(command);
            for state in ConnectionState::ALL {
                assert!(
                    !(rule.ignore.contains(&state) && rule.valid_from.contains(&state)),
                    "{} appears in two partitions for {}",
                    state,
                    command
                );
            }
        }
    }

    #[test]
    fn test_attempt_yields_exactly_one_outcome() {
        for command in ALL_COMMANDS {
            let rule = TransitionTable::rule(command);
            for state in ConnectionState::ALL {
                match TransitionTable::attempt(state, command) {
                    Ok((new_state, false)) => {
                        assert!(rule.ignore.contains(&state));
                        assert_eq!(new_state, state);
                    }
                    Ok((new_state, true)) => {
                        assert!(rule.valid_from.contains(&state));
                        assert_eq!(new_state, rule.target);
                    }
                    Err(DaqError::InvalidTransition {
                        command: c,
                        state: s,
                    }) => {
                        assert!(!rule.ignore.contains(&state));
                        assert!(!rule.valid_from.contains(&state));
                        assert_eq!(c, command);
                        assert_eq!(s, state);
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }
    }

    #[test]
    fn test_connect_is_idempotent_once_connected() {
        let (state, applied) =
            TransitionTable::attempt(ConnectionState::Connected, TransitionCommand::Connect)
                .unwrap();
        assert_eq!(state, ConnectionState::Connected);
        assert!(!applied);
    }

    #[test]
    fn test_begin_requires_configured_or_open() {
        let (state, applied) =
            TransitionTable::attempt(ConnectionState::Configured, TransitionCommand::Begin)
                .unwrap();
        assert_eq!(state, ConnectionState::Running);
        assert!(applied);

        let err =
            TransitionTable::attempt(ConnectionState::Connected, TransitionCommand::Begin)
                .unwrap_err();
        assert!(matches!(err, DaqError::InvalidTransition { .. }));
    }

    #[test]
    fn test_stop_only_applies_while_running() {
        let (state, applied) =
            TransitionTable::attempt(ConnectionState::Running, TransitionCommand::Stop).unwrap();
        assert_eq!(state, ConnectionState::Open);
        assert!(applied);

        // Stopping an already-stopped run is a no-op, not an error.
        let (state, applied) =
            TransitionTable::attempt(ConnectionState::Open, TransitionCommand::Stop).unwrap();
        assert_eq!(state, ConnectionState::Open);
        assert!(!applied);
    }

    #[test]
    fn test_endrun_lands_in_configured() {
        for from in [ConnectionState::Open, ConnectionState::Running] {
            let (state, applied) =
                TransitionTable::attempt(from, TransitionCommand::EndRun).unwrap();
            assert_eq!(state, ConnectionState::Configured);
            assert!(applied);
        }
    }
}
