//! Control-and-orchestration layer for a scientific DAQ subsystem.
//!
//! This library drives the acquisition lifecycle (connect, configure,
//! begin, stop, end run) against an injected backend, with asynchronous
//! commands that report completion through [`CommandStatus`] handles
//! instead of blocking the experiment-control task. [`SimControl`] provides
//! a deterministic virtual-time backend implementing the same command
//! surface, so sequences can be exercised without a live acquisition
//! service.

pub mod backend;
pub mod config;
pub mod daq;
pub mod error;
pub mod sim;
pub mod state;
pub mod status;

pub use backend::{Backend, BackendArgs};
pub use config::{configuration_schema, ControlValue, DaqConfig, DataKind, FieldDescription};
pub use daq::Daq;
pub use error::{DaqError, DaqResult};
pub use sim::{SimControl, EVENT_RATE_HZ};
pub use state::{ConnectionState, TransitionCommand, TransitionRule, TransitionTable};
pub use status::{CommandOutcome, CommandStatus};
