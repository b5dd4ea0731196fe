//! The backend command surface shared by the live control link and the
//! simulator.
//!
//! The controller never talks to acquisition hardware directly; it drives a
//! [`Backend`] injected at construction time. The real control link and
//! [`SimControl`] both implement this trait, so the controller and its tests
//! behave identically against either.
//!
//! [`SimControl`]: crate::sim::SimControl

use anyhow::Result;
use async_trait::async_trait;

use crate::config::ControlValue;
use crate::state::ConnectionState;

/// Arguments for the backend `configure` and `begin` commands.
///
/// At most one of the event-count fields and `duration` is expected to be
/// set; backends resolve them in priority order `events`, `l1t_events`,
/// `l3t_events`, then `duration`. `record` only applies to `configure`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendArgs {
    /// Raw event count bounding the run.
    pub events: Option<u64>,
    /// Event count after the level-1 trigger.
    pub l1t_events: Option<u64>,
    /// Event count after the level-3 trigger.
    pub l3t_events: Option<u64>,
    /// Run length in seconds.
    pub duration: Option<f64>,
    /// Whether to record the run (configure only).
    pub record: Option<bool>,
    /// Control variables to inject into the data stream.
    pub controls: Option<Vec<(String, ControlValue)>>,
}

/// Command surface of a DAQ control link.
///
/// All methods take `&self`; implementations guard their own state, since
/// the controller issues `begin`/`end` from background workers while the
/// control task keeps its handle.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Take control of the acquisition service.
    async fn connect(&self) -> Result<()>;

    /// Release control of the acquisition service.
    async fn disconnect(&self) -> Result<()>;

    /// Commit a run configuration.
    async fn configure(&self, args: BackendArgs) -> Result<()>;

    /// Start acquiring. Non-blocking: returns once acquisition has begun,
    /// not once it has finished.
    async fn begin(&self, args: BackendArgs) -> Result<()>;

    /// Stop acquiring, leaving the run open.
    async fn stop(&self) -> Result<()>;

    /// Close the current run.
    async fn endrun(&self) -> Result<()>;

    /// Suspend until the current run stops, by reaching its bound or by an
    /// explicit `stop`. Fails when no run is in progress.
    async fn end(&self) -> Result<()>;

    /// Current lifecycle state of the control link.
    async fn state(&self) -> ConnectionState;
}
