//! The DAQ controller.
//!
//! [`Daq`] drives the acquisition lifecycle against an injected [`Backend`]
//! (the live control link or [`SimControl`]) in lock-step with the rest of
//! an experiment-control sequence. Synchronous portions of each call run on
//! the calling task and are serialized by an internal mutex; the
//! asynchronous halves (`kickoff`, `complete`) run on spawned workers that
//! touch only the backend handle and their [`CommandStatus`], never the
//! controller's own fields.
//!
//! Error behavior is deliberately asymmetric: `connect` swallows backend
//! failures into a logged message and a cleared handle (callers poll
//! [`Daq::connected`] to detect them), while every other operation raises.
//!
//! [`SimControl`]: crate::sim::SimControl

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::config::{configuration_schema, ControlValue, DaqConfig, FieldDescription};
use crate::error::{DaqError, DaqResult};
use crate::state::ConnectionState;
use crate::status::CommandStatus;

#[derive(Default)]
struct Inner {
    /// Live backend handle. Present if and only if the DAQ is connected.
    control: Option<Arc<dyn Backend>>,
    /// Configuration committed by the last successful configure.
    config: Option<DaqConfig>,
}

/// Controller for one DAQ instance.
///
/// Created disconnected, with no configuration. The backend capability is
/// injected at construction; a controller built with [`Daq::detached`] has
/// none, and `connect` reports that instead of degrading globally.
pub struct Daq {
    name: String,
    backend: Option<Arc<dyn Backend>>,
    inner: Mutex<Inner>,
}

impl Daq {
    /// Create a controller for `backend`, initially disconnected.
    pub fn new(name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            backend: Some(backend),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Create a controller with no control backend available.
    pub fn detached(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The controller's name, used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a live backend handle is bound.
    pub async fn connected(&self) -> bool {
        self.inner.lock().await.control.is_some()
    }

    /// Whether a run configuration is committed.
    pub async fn configured(&self) -> bool {
        self.inner.lock().await.config.is_some()
    }

    /// Current lifecycle state, as reported by the backend. Disconnected
    /// when no handle is bound.
    pub async fn state(&self) -> ConnectionState {
        let control = self.inner.lock().await.control.clone();
        match control {
            Some(control) => control.state().await,
            None => ConnectionState::Disconnected,
        }
    }

    /// Connect to the DAQ, taking control away from the operator GUI.
    ///
    /// Idempotent if already connected. A backend failure is logged and
    /// leaves the controller disconnected; it is not raised. Callers that
    /// need to know should check [`Daq::connected`] afterwards.
    pub async fn connect(&self) {
        let mut inner = self.inner.lock().await;
        self.connect_locked(&mut inner).await;
    }

    async fn connect_locked(&self, inner: &mut Inner) {
        if inner.control.is_some() {
            info!("DAQ '{}': connect requested, but already connected", self.name);
            return;
        }
        let Some(backend) = &self.backend else {
            error!(
                "DAQ '{}': no control backend is available in this session",
                self.name
            );
            return;
        };
        match backend.connect().await {
            Ok(()) => {
                inner.control = Some(Arc::clone(backend));
                info!("DAQ '{}': connected", self.name);
            }
            Err(err) => {
                error!(
                    "DAQ '{}': failed to connect - check that it is up and allocated: {err:#}",
                    self.name
                );
            }
        }
    }

    /// Disconnect from the DAQ, giving control back to the operator GUI.
    ///
    /// Unconditional: always ends Disconnected with the configuration
    /// cleared, and is safe to call repeatedly.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(control) = inner.control.take() {
            if let Err(err) = control.disconnect().await {
                warn!("DAQ '{}': backend disconnect failed: {err:#}", self.name);
            }
        }
        inner.config = None;
        info!("DAQ '{}': disconnected", self.name);
    }

    /// Guard requiring a live handle, attempting an auto-connect first.
    async fn ensure_connected(&self, inner: &mut Inner) -> DaqResult<Arc<dyn Backend>> {
        if inner.control.is_none() {
            if self.backend.is_none() {
                return Err(DaqError::BackendUnavailable);
            }
            info!("DAQ '{}' is not connected, attempting to connect", self.name);
            self.connect_locked(inner).await;
        }
        inner.control.clone().ok_or(DaqError::NotConnected)
    }

    /// Guard requiring a committed configuration.
    fn ensure_configured(inner: &Inner) -> DaqResult<DaqConfig> {
        inner.config.clone().ok_or(DaqError::NotConfigured)
    }

    /// Change the configuration for the next run.
    ///
    /// `events` and `duration` in `request` fall back to the previously
    /// committed values when both are absent; if nothing resolves the call
    /// fails with [`DaqError::Configuration`] and the committed
    /// configuration is untouched. A backend failure rolls the committed
    /// configuration back to none and reports `(old, None)` instead of
    /// raising.
    ///
    /// Returns the configurations in effect before and after the call, both
    /// read from committed state rather than the raw arguments.
    pub async fn configure(
        &self,
        request: DaqConfig,
    ) -> DaqResult<(Option<DaqConfig>, Option<DaqConfig>)> {
        debug!("DAQ '{}': configure({request:?})", self.name);
        let mut inner = self.inner.lock().await;
        let control = self.ensure_connected(&mut inner).await?;
        let old = inner.config.clone();

        let mut committed = request;
        if committed.events.is_none() && committed.duration.is_none() {
            if let Some(previous) = &old {
                committed.events = previous.events;
                committed.duration = previous.duration;
            }
        }
        let args = committed.configure_args()?;

        match control.configure(args).await {
            Ok(()) => {
                inner.config = Some(committed);
                info!("DAQ '{}': configured", self.name);
                let new = inner.config.clone();
                Ok((old, new))
            }
            Err(err) => {
                inner.config = None;
                error!("DAQ '{}': failed to configure: {err:#}", self.name);
                Ok((old, None))
            }
        }
    }

    /// Begin acquisition without blocking.
    ///
    /// Requires a committed configuration. Immediately returns a
    /// [`CommandStatus`] that resolves once the backend's begin command has
    /// returned control, meaning the DAQ has *begun* recording, not
    /// finished. Arguments fall back to the committed configuration when
    /// not given.
    pub async fn kickoff(
        &self,
        events: Option<u64>,
        duration: Option<f64>,
        use_l3t: Option<bool>,
    ) -> DaqResult<CommandStatus> {
        debug!(
            "DAQ '{}': kickoff(events={events:?}, duration={duration:?}, use_l3t={use_l3t:?})",
            self.name
        );
        let inner = self.inner.lock().await;
        let config = Self::ensure_configured(&inner)?;
        let control = inner.control.clone().ok_or(DaqError::NotConnected)?;
        drop(inner);

        let run = if events.is_some() || duration.is_some() {
            DaqConfig {
                events,
                duration,
                use_l3t: use_l3t.unwrap_or(config.use_l3t),
                record: config.record,
                controls: config.controls.clone(),
            }
        } else {
            DaqConfig {
                use_l3t: use_l3t.unwrap_or(config.use_l3t),
                ..config
            }
        };
        let args = run.run_args()?;

        let status = CommandStatus::new();
        let worker_status = status.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            match control.begin(args).await {
                Ok(()) => {
                    let _ = worker_status.succeed();
                    debug!("DAQ '{name}': marked kickoff as complete");
                }
                Err(err) => {
                    error!("DAQ '{name}': begin command failed: {err:#}");
                    let _ = worker_status.fail(err.to_string());
                }
            }
        });
        Ok(status)
    }

    /// Return a status that resolves once the DAQ has finished acquiring.
    ///
    /// May represent an unbounded wait when the run has no bound (an event
    /// count of 0); the only way to resolve it then is an explicit stop.
    pub async fn complete(&self) -> DaqResult<CommandStatus> {
        debug!("DAQ '{}': complete()", self.name);
        let control = self
            .inner
            .lock()
            .await
            .control
            .clone()
            .ok_or(DaqError::NotConnected)?;

        let status = CommandStatus::new();
        let worker_status = status.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            match control.end().await {
                Ok(()) => {
                    let _ = worker_status.succeed();
                    debug!("DAQ '{name}': marked acquisition as complete");
                }
                Err(err) => {
                    error!("DAQ '{name}': end command failed: {err:#}");
                    let _ = worker_status.fail(err.to_string());
                }
            }
        });
        Ok(status)
    }

    /// Suspend until the DAQ is done acquiring, or until `timeout` elapses.
    ///
    /// Equivalent to `complete()` followed by a wait on the returned
    /// status. The timeout is advisory: it does not cancel the underlying
    /// run.
    pub async fn wait(&self, timeout: Option<Duration>) -> DaqResult<()> {
        debug!("DAQ '{}': wait({timeout:?})", self.name);
        {
            let mut inner = self.inner.lock().await;
            self.ensure_connected(&mut inner).await?;
        }
        self.complete().await?.wait(timeout).await
    }

    /// Start the DAQ and block until it has begun acquiring; with `wait`
    /// also block until it has finished.
    pub async fn begin(
        &self,
        events: Option<u64>,
        duration: Option<f64>,
        wait: bool,
    ) -> DaqResult<()> {
        debug!(
            "DAQ '{}': begin(events={events:?}, duration={duration:?}, wait={wait})",
            self.name
        );
        let status = self.kickoff(events, duration, None).await?;
        status.wait(None).await?;
        if wait {
            self.wait(None).await?;
        }
        Ok(())
    }

    /// Stop the current acquisition, ending it early. A no-op at the
    /// backend level if nothing is running.
    pub async fn stop(&self) -> DaqResult<()> {
        debug!("DAQ '{}': stop()", self.name);
        let mut inner = self.inner.lock().await;
        let control = self.ensure_connected(&mut inner).await?;
        control.stop().await?;
        Ok(())
    }

    /// Stop the DAQ if it is running, then mark the run as finished.
    pub async fn end_run(&self) -> DaqResult<()> {
        debug!("DAQ '{}': end_run()", self.name);
        let mut inner = self.inner.lock().await;
        let control = self.ensure_connected(&mut inner).await?;
        control.stop().await?;
        control.endrun().await?;
        Ok(())
    }

    /// Stop acquiring without ending the run. A no-op unless Running.
    pub async fn pause(&self) -> DaqResult<()> {
        debug!("DAQ '{}': pause()", self.name);
        if self.state().await == ConnectionState::Running {
            self.stop().await?;
        }
        Ok(())
    }

    /// Continue acquiring in a previously paused run. A no-op unless Open.
    pub async fn resume(&self) -> DaqResult<()> {
        debug!("DAQ '{}': resume()", self.name);
        if self.state().await == ConnectionState::Open {
            self.begin(None, None, false).await?;
        }
        Ok(())
    }

    /// A deep copy of the committed configuration.
    pub async fn read_configuration(&self) -> DaqResult<DaqConfig> {
        debug!("DAQ '{}': read_configuration()", self.name);
        let inner = self.inner.lock().await;
        Self::ensure_configured(&inner)
    }

    /// Static field metadata describing the configuration schema.
    ///
    /// Unconditional; the `controls` shape reflects however many control
    /// variables are currently configured.
    pub async fn describe_configuration(&self) -> HashMap<String, FieldDescription> {
        debug!("DAQ '{}': describe_configuration()", self.name);
        let controls_len = {
            let inner = self.inner.lock().await;
            inner
                .config
                .as_ref()
                .and_then(|config| config.controls.as_ref())
                .map(Vec::len)
        };
        configuration_schema(controls_len)
    }

    /// Collect partial event documents for the flyer protocol.
    ///
    /// The DAQ reports no data through this layer, so this is always an
    /// immediately exhausted sequence, not an error.
    pub fn collect(&self) -> std::iter::Empty<HashMap<String, ControlValue>> {
        debug!("DAQ '{}': collect()", self.name);
        std::iter::empty()
    }

    /// Schema for [`Daq::collect`]: empty, since nothing is collected.
    pub fn describe_collect(&self) -> HashMap<String, FieldDescription> {
        debug!("DAQ '{}': describe_collect()", self.name);
        HashMap::new()
    }
}

impl Drop for Daq {
    /// Best-effort teardown: no acquisition resources survive the
    /// controller. The backend disconnect is spawned when a runtime is
    /// still available.
    fn drop(&mut self) {
        let Ok(mut inner) = self.inner.try_lock() else {
            return;
        };
        inner.config = None;
        let Some(control) = inner.control.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let name = self.name.clone();
            handle.spawn(async move {
                if let Err(err) = control.disconnect().await {
                    warn!("DAQ '{name}': disconnect on drop failed: {err:#}");
                }
            });
        }
    }
}
