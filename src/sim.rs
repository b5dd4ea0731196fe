//! Virtual-time simulator for the DAQ control link.
//!
//! [`SimControl`] implements the full [`Backend`] command surface on top of
//! the [`TransitionTable`], emulating acquisition duration with a countdown
//! task on a fixed virtual tick. It exists so the controller and its tests
//! behave identically without a live acquisition service; under a paused
//! tokio clock the countdown is fully deterministic.
//!
//! Duration resolution mirrors the live control link: the first non-null
//! event-count field (in priority order `events`, `l1t_events`,
//! `l3t_events`) sets the run length to `count / 120`, with a count of
//! exactly `0` meaning an unbounded run; otherwise `duration` is used
//! directly. A `begin` with nothing resolvable is a hard fault, because the
//! live control link crashes in that situation and the simulator must not
//! paper over it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use tokio::sync::{watch, Mutex};

use crate::backend::{Backend, BackendArgs};
use crate::error::DaqError;
use crate::state::{ConnectionState, TransitionCommand, TransitionTable};

/// Fixed virtual event rate used to convert event counts into seconds.
pub const EVENT_RATE_HZ: f64 = 120.0;

/// Virtual countdown tick.
const TICK: Duration = Duration::from_millis(100);

struct SimState {
    connection: ConnectionState,
    /// Duration committed by the last applied `configure`.
    configured_duration: Option<f64>,
    /// Virtual seconds left in the current run.
    time_remaining: f64,
}

struct SimShared {
    state: Mutex<SimState>,
    /// Set when a run stops and cleared by the next begin; `end` waiters
    /// resolve on it.
    done: watch::Sender<bool>,
}

/// Simulated DAQ control link.
///
/// Cheap to clone; clones share the same simulated service.
#[derive(Clone)]
pub struct SimControl {
    shared: Arc<SimShared>,
}

impl SimControl {
    /// Create a simulator in the Disconnected state.
    pub fn new() -> Self {
        let (done, _rx) = watch::channel(false);
        Self {
            shared: Arc::new(SimShared {
                state: Mutex::new(SimState {
                    connection: ConnectionState::Disconnected,
                    configured_duration: None,
                    time_remaining: 0.0,
                }),
                done,
            }),
        }
    }

    /// Virtual seconds left in the current run. Zero when no run is active.
    pub async fn time_remaining(&self) -> f64 {
        self.shared.state.lock().await.time_remaining
    }

    /// Duration committed by the last applied `configure`, if any.
    pub async fn configured_duration(&self) -> Option<f64> {
        self.shared.state.lock().await.configured_duration
    }

    /// Resolve a run length in virtual seconds from command arguments.
    fn pick_duration(args: &BackendArgs) -> Option<f64> {
        for count in [args.events, args.l1t_events, args.l3t_events] {
            if let Some(count) = count {
                if count == 0 {
                    return Some(f64::INFINITY);
                }
                return Some(count as f64 / EVENT_RATE_HZ);
            }
        }
        args.duration
    }

    /// Apply a lifecycle command through the transition table.
    async fn transition(shared: &SimShared, command: TransitionCommand) -> Result<bool> {
        let mut st = shared.state.lock().await;
        let (next, applied) = TransitionTable::attempt(st.connection, command)?;
        st.connection = next;
        debug!("SimControl {} -> {} (applied: {})", command, next, applied);
        Ok(applied)
    }

    /// Stop or close the current run, discarding remaining time and
    /// releasing `end` waiters.
    async fn halt(shared: &SimShared, command: TransitionCommand) -> Result<()> {
        // One critical section: a concurrent `end` must never observe the
        // stopped state with the done flag still cleared.
        let mut st = shared.state.lock().await;
        let (next, applied) = TransitionTable::attempt(st.connection, command)?;
        st.connection = next;
        st.time_remaining = 0.0;
        debug!("SimControl {} -> {} (applied: {})", command, next, applied);
        // send_replace stores the flag even when no waiter is subscribed.
        let _ = shared.done.send_replace(true);
        Ok(())
    }

    /// Background countdown for one run. Decrements remaining time on each
    /// virtual tick; reaching zero triggers an autonomous stop, while an
    /// explicit stop or endrun interrupts the countdown early.
    async fn countdown(shared: Arc<SimShared>) {
        let mut done_rx = shared.done.subscribe();
        let mut interrupted = false;
        loop {
            {
                let st = shared.state.lock().await;
                if st.time_remaining <= 0.0 {
                    break;
                }
            }
            tokio::select! {
                // The watch guard must not outlive its arm, or the future
                // holding it could not be spawned.
                () = async { let _ = done_rx.wait_for(|done| *done).await; } => {
                    interrupted = true;
                    break;
                }
                () = tokio::time::sleep(TICK) => {
                    let mut st = shared.state.lock().await;
                    st.time_remaining -= TICK.as_secs_f64();
                }
            }
        }
        if !interrupted {
            if let Err(err) = Self::halt(&shared, TransitionCommand::Stop).await {
                debug!("SimControl autonomous stop ignored: {err:#}");
            }
        }
    }
}

impl Default for SimControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for SimControl {
    async fn connect(&self) -> Result<()> {
        Self::transition(&self.shared, TransitionCommand::Connect).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Self::transition(&self.shared, TransitionCommand::Disconnect).await?;
        Ok(())
    }

    async fn configure(&self, args: BackendArgs) -> Result<()> {
        if Self::transition(&self.shared, TransitionCommand::Configure).await? {
            let duration = Self::pick_duration(&args).ok_or_else(|| {
                DaqError::Configuration("configure requires events or duration".to_string())
            })?;
            self.shared.state.lock().await.configured_duration = Some(duration);
        }
        Ok(())
    }

    async fn begin(&self, args: BackendArgs) -> Result<()> {
        // The whole setup happens under the state lock so an `end` waiter
        // cannot observe the Running state before the done flag is cleared.
        let mut st = self.shared.state.lock().await;
        let (next, applied) =
            TransitionTable::attempt(st.connection, TransitionCommand::Begin)?;
        st.connection = next;
        if applied {
            // The live control link crashes on a begin with no bound at
            // all; fault loudly instead of guessing a duration.
            let duration = Self::pick_duration(&args).ok_or_else(|| {
                DaqError::Configuration(
                    "begin requires events or duration (the live control link crashes here)"
                        .to_string(),
                )
            })?;
            st.time_remaining = duration;
            let _ = self.shared.done.send_replace(false);
            debug!("SimControl beginning a {}s run", duration);
            tokio::spawn(Self::countdown(Arc::clone(&self.shared)));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Self::halt(&self.shared, TransitionCommand::Stop).await
    }

    async fn endrun(&self) -> Result<()> {
        Self::halt(&self.shared, TransitionCommand::EndRun).await
    }

    async fn end(&self) -> Result<()> {
        let mut done_rx = {
            // Subscribe under the lock so a stop cannot slip between the
            // state check and the subscription. The done flag stays set
            // from the moment a run stops until the next begin, so an end
            // issued around an explicit stop still resolves.
            let st = self.shared.state.lock().await;
            if st.connection != ConnectionState::Running && !*self.shared.done.borrow() {
                return Err(anyhow!("no run in progress"));
            }
            self.shared.done.subscribe()
        };
        done_rx
            .wait_for(|done| *done)
            .await
            .map_err(|_| anyhow!("simulator shut down while waiting for run end"))?;
        Ok(())
    }

    async fn state(&self) -> ConnectionState {
        self.shared.state.lock().await.connection
    }
}
