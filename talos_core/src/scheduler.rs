// talos_core/src/scheduler.rs

//! The fixed-rate control loop. One scheduler drives one backend session:
//! it reads and bundles observations, arbitrates between teleoperation and
//! policy inference, issues commands, and records (frame, action) pairs.
//! Tick-local faults are absorbed here; session-level faults end the episode
//! cleanly with a failure label and park the loop in `Faulted`.

use crate::adapter::{Backend, BackendSession};
use crate::bundler::ObservationBundler;
use crate::config::{ControlConfig, SafeDefault};
use crate::episode::EpisodeOutcome;
use crate::errors::{AdapterError, PolicyError, RecorderError};
use crate::latest::Latest;
use crate::messages::{Action, ActionSource, Frame, TeleopSample};
use crate::policy::{InferenceOutcome, InferenceWorker};
use crate::recorder::{EpisodeHandle, EpisodeRecorder};
use crate::types::Stamped;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// =========================================================================
// == Loop State Machine ==
// =========================================================================

/// Lifecycle of one scheduler. `Faulted` is terminal for the session: the
/// episode in progress is persisted with a failure label and an explicit
/// reconnect is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Connecting,
    /// Connected; between episodes.
    Ready,
    /// Capturing a teleoperated demonstration.
    Recording,
    /// Running a policy in closed loop.
    RollingOut,
    Stopping,
    Faulted,
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("control loop is in state {state:?}; expected {expected}")]
    InvalidState {
        state: LoopState,
        expected: &'static str,
    },

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

// =========================================================================
// == Stop Signal ==
// =========================================================================

#[derive(Default)]
struct StopInner {
    requested: AtomicBool,
    label: Mutex<Option<EpisodeOutcome>>,
}

/// One-way stop signal, observed at the top of each tick, never mid-tick,
/// so a half-formed action is never sent to an actuator. Once a stop is
/// requested, no further action is sent that episode. The operator may
/// attach an outcome label; a bare stop labels the episode `Success`
/// (a completed demonstration).
#[derive(Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.request_stop_with(EpisodeOutcome::Success);
    }

    pub fn request_stop_with(&self, outcome: EpisodeOutcome) {
        {
            let mut label = self
                .inner
                .label
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            *label = Some(outcome);
        }
        self.inner.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    fn labelled_outcome(&self) -> EpisodeOutcome {
        self.inner
            .label
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .unwrap_or(EpisodeOutcome::Success)
    }

    /// Re-arm for the next episode, after a stop has been consumed.
    fn reset(&self) {
        self.inner.requested.store(false, Ordering::Release);
        let mut label = self
            .inner
            .label
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        *label = None;
    }
}

// =========================================================================
// == Per-Episode Diagnostics ==
// =========================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    /// Ticks whose processing exceeded the tick budget. Logged, not fatal.
    pub overruns: u64,
    /// Rejected or timed-out backend commands.
    pub command_faults: u64,
    /// Policy inferences that missed the deadline.
    pub policy_timeouts: u64,
    /// Policy inferences that failed outright or returned bad dimensions.
    pub policy_faults: u64,
}

/// What one `run_episode` call produced.
pub struct EpisodeReport {
    pub outcome: EpisodeOutcome,
    pub steps: usize,
    pub stats: TickStats,
    /// Resolves to the on-disk path once the background writer lands it.
    pub handle: EpisodeHandle,
    /// The session fault that ended the episode, if any.
    pub fault: Option<AdapterError>,
}

// =========================================================================
// == Action Sources ==
// =========================================================================

/// Where each tick's action comes from. The scheduler owns the arbitration;
/// swapping between a human and a policy is a matter of which provider is
/// handed in; nothing else in the loop changes.
pub enum ActionProvider {
    /// Newest sample from the human-input feed, downsampled to the tick.
    Teleop(Latest<Stamped<TeleopSample>>),
    /// A loaded policy behind a bounded-wait inference worker.
    Policy(InferenceWorker),
}

// =========================================================================
// == The Control Loop ==
// =========================================================================

pub struct ControlLoop {
    config: ControlConfig,
    bundler: ObservationBundler,
    recorder: EpisodeRecorder,
    stop: StopHandle,
    state: LoopState,
    session: Option<BackendSession>,
    last_action: Option<Action>,
    /// World/task variation index recorded into episode metadata.
    world_idx: Option<u64>,
}

impl ControlLoop {
    pub fn new(
        config: ControlConfig,
        bundler: ObservationBundler,
        recorder: EpisodeRecorder,
    ) -> Self {
        Self {
            config,
            bundler,
            recorder,
            stop: StopHandle::new(),
            state: LoopState::Idle,
            session: None,
            last_action: None,
            world_idx: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Handle for operators/automation to end the current episode.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn set_world_idx(&mut self, world_idx: Option<u64>) {
        self.world_idx = world_idx;
    }

    /// Open a session against `backend`. Exactly one scheduler may hold one;
    /// a concurrent attempt fails with `SessionBusy` and changes nothing.
    pub fn connect(&mut self, backend: &dyn Backend) -> Result<(), LoopError> {
        if self.state != LoopState::Idle {
            return Err(LoopError::InvalidState {
                state: self.state,
                expected: "Idle",
            });
        }
        self.state = LoopState::Connecting;
        match backend.connect() {
            Ok(session) => {
                info!(backend = %session.backend_id(), "session connected");
                self.session = Some(session);
                self.state = LoopState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = LoopState::Idle;
                Err(e.into())
            }
        }
    }

    /// Close the session and return to `Idle`. Valid from `Ready` (normal
    /// shutdown) and `Faulted` (explicit restart after a session fault).
    pub fn close(&mut self) -> Result<(), LoopError> {
        match self.state {
            LoopState::Ready | LoopState::Faulted => {
                self.session = None;
                self.last_action = None;
                self.state = LoopState::Idle;
                Ok(())
            }
            state => Err(LoopError::InvalidState {
                state,
                expected: "Ready or Faulted",
            }),
        }
    }

    /// Run one episode to completion: operator stop, episode-length limit,
    /// or backend fault. A faulted episode is still persisted (partial
    /// episodes are valuable negative/recovery data) and the loop parks in
    /// `Faulted` instead of returning to `Ready`.
    pub fn run_episode(
        &mut self,
        provider: &mut ActionProvider,
    ) -> Result<EpisodeReport, LoopError> {
        if self.state != LoopState::Ready {
            return Err(LoopError::InvalidState {
                state: self.state,
                expected: "Ready",
            });
        }
        let mut session = self.session.take().ok_or(LoopError::InvalidState {
            state: LoopState::Idle,
            expected: "a connected session",
        })?;

        let result = self.drive(&mut session, provider);
        self.stop.reset();

        match result {
            Ok(report) => {
                if let Some(fault) = &report.fault {
                    error!(error = %fault, "session fault; loop is now Faulted");
                    self.state = LoopState::Faulted;
                    // Dropping the session releases the lease and
                    // disconnects the adapter.
                } else {
                    self.state = LoopState::Ready;
                    self.session = Some(session);
                }
                Ok(report)
            }
            Err(e) => {
                // Recorder/worker wiring failure: the session itself is fine.
                self.state = LoopState::Ready;
                self.session = Some(session);
                Err(e)
            }
        }
    }

    fn drive(
        &mut self,
        session: &mut BackendSession,
        provider: &mut ActionProvider,
    ) -> Result<EpisodeReport, LoopError> {
        let (state, source, policy_identity) = match provider {
            ActionProvider::Teleop(_) => (LoopState::Recording, ActionSource::Teleop, None),
            ActionProvider::Policy(worker) => {
                worker.reset()?;
                (
                    LoopState::RollingOut,
                    ActionSource::Policy,
                    Some(worker.identity().to_string()),
                )
            }
        };
        self.state = state;
        // Safe defaults never reach back into a previous episode: HoldLast
        // degrades to hold-position until this episode sends something.
        self.last_action = None;
        self.recorder.begin(
            session.backend_id().clone(),
            policy_identity,
            self.config.tick_period_s(),
            self.world_idx,
        )?;
        info!(
            backend = %session.backend_id(),
            mode = ?state,
            tick_rate_hz = self.config.tick_rate_hz,
            "episode started"
        );

        let period = self.config.tick_period();
        let command_timeout = self.config.command_timeout();
        let mut stats = TickStats::default();
        let mut consecutive_faults: u32 = 0;
        let mut fault: Option<AdapterError> = None;
        let mut stop_outcome: Option<EpisodeOutcome> = None;
        let mut next_tick = Instant::now();

        while self.recorder.frame_count() < self.config.episode_limit {
            // Stop beats a fresh frame: once requested, nothing more is sent.
            if self.stop.is_requested() {
                stop_outcome = Some(self.stop.labelled_outcome());
                break;
            }

            // (1) Observe.
            let raw = match session.read_state() {
                Ok(raw) => raw,
                Err(e) => {
                    fault = Some(e);
                    break;
                }
            };
            let frame = self.bundler.bundle(raw);

            // (2) Choose the action source for this tick.
            let intended = match provider {
                ActionProvider::Teleop(cell) => {
                    match self.teleop_action(cell, &frame) {
                        Some(action) => action,
                        None => {
                            // Device-side stop button.
                            stop_outcome = Some(EpisodeOutcome::Success);
                            break;
                        }
                    }
                }
                ActionProvider::Policy(worker) => self.policy_action(worker, &frame, &mut stats),
            };

            // (3) Actuate. Rejections and timeouts are tick-local: the safe
            // default goes out instead, and only repetition escalates.
            let mut sent = intended;
            match session.send_command(&sent, command_timeout) {
                Ok(_ack) => {
                    consecutive_faults = 0;
                    self.last_action = Some(sent.clone());
                }
                Err(e) if e.is_session_fault() => {
                    fault = Some(e);
                    break;
                }
                Err(e) => {
                    stats.command_faults += 1;
                    consecutive_faults += 1;
                    warn!(
                        error = %e,
                        consecutive = consecutive_faults,
                        "command fault; substituting safe default"
                    );

                    let safe = self.safe_default_action(&frame, source);
                    match session.send_command(&safe, command_timeout) {
                        Ok(_ack) => {
                            self.last_action = Some(safe.clone());
                        }
                        Err(e2) if e2.is_session_fault() => {
                            fault = Some(e2);
                            break;
                        }
                        Err(e2) => {
                            debug!(error = %e2, "safe default also refused");
                        }
                    }
                    sent = safe;

                    if consecutive_faults >= self.config.max_consecutive_command_faults {
                        error!(
                            consecutive = consecutive_faults,
                            "command faults escalated to session fault"
                        );
                        fault = Some(e);
                    }
                }
            }

            // (4) Record exactly one action for this frame.
            self.recorder.append(frame, sent)?;
            stats.ticks += 1;

            if fault.is_some() {
                break;
            }

            // (5) Hold the tick rate. An overrun is logged and counted, not
            // fatal; the schedule re-anchors so error does not accumulate.
            next_tick += period;
            let now = Instant::now();
            if now <= next_tick {
                thread::sleep(next_tick - now);
            } else {
                stats.overruns += 1;
                warn!(
                    over_ms = (now - next_tick).as_secs_f64() * 1e3,
                    "tick overran its budget"
                );
                next_tick = now;
            }
        }

        self.state = LoopState::Stopping;
        let outcome = if fault.is_some() {
            EpisodeOutcome::Failure
        } else {
            stop_outcome.unwrap_or(EpisodeOutcome::Success)
        };
        let steps = self.recorder.frame_count();
        let handle = self.recorder.finalize(outcome, stats.overruns)?;
        info!(steps, ?outcome, overruns = stats.overruns, "episode ended");

        Ok(EpisodeReport {
            outcome,
            steps,
            stats,
            handle,
            fault,
        })
    }

    /// Build this tick's action from the newest teleop sample. `None` means
    /// the device requested a stop.
    fn teleop_action(
        &self,
        cell: &Latest<Stamped<TeleopSample>>,
        frame: &Frame,
    ) -> Option<Action> {
        match cell.peek() {
            Some(stamped) => {
                let sample = stamped.value;
                if sample.stop_requested {
                    return None;
                }
                if sample.joint_delta.len() != frame.joints.positions.len() {
                    warn!(
                        device_dims = sample.joint_delta.len(),
                        backend_dims = frame.joints.positions.len(),
                        "teleop sample has wrong dimensions; holding position"
                    );
                    return Some(Action::hold_position(frame, ActionSource::Teleop));
                }
                Some(Action {
                    joint_target: &frame.joints.positions + &sample.joint_delta,
                    gripper_target: frame.gripper_pos + sample.gripper_delta,
                    source: ActionSource::Teleop,
                })
            }
            // No input yet this session: hold still rather than guess.
            None => Some(Action::hold_position(frame, ActionSource::Teleop)),
        }
    }

    /// Ask the policy worker for an action with a bounded wait. A timeout or
    /// failure substitutes the safe default rather than skipping the tick.
    fn policy_action(
        &self,
        worker: &mut InferenceWorker,
        frame: &Frame,
        stats: &mut TickStats,
    ) -> Action {
        match worker.infer_bounded(frame, self.config.inference_timeout()) {
            InferenceOutcome::Ready(inference) => {
                debug!(
                    latency_ms = inference.latency.as_secs_f64() * 1e3,
                    "inference complete"
                );
                if inference.action.joint_target.len() != frame.joints.positions.len() {
                    warn!(
                        policy_dims = inference.action.joint_target.len(),
                        backend_dims = frame.joints.positions.len(),
                        "policy action has wrong dimensions; substituting safe default"
                    );
                    stats.policy_faults += 1;
                    return self.safe_default_action(frame, ActionSource::Policy);
                }
                inference.action
            }
            InferenceOutcome::TimedOut => {
                stats.policy_timeouts += 1;
                self.safe_default_action(frame, ActionSource::Policy)
            }
            InferenceOutcome::Failed(e) => {
                warn!(error = %e, "inference failed; substituting safe default");
                stats.policy_faults += 1;
                self.safe_default_action(frame, ActionSource::Policy)
            }
        }
    }

    fn safe_default_action(&self, frame: &Frame, source: ActionSource) -> Action {
        match self.config.safe_default {
            SafeDefault::HoldLast => match &self.last_action {
                Some(last) => {
                    let mut action = last.clone();
                    action.source = source;
                    action
                }
                None => Action::hold_position(frame, source),
            },
            SafeDefault::HoldPosition => Action::hold_position(frame, source),
        }
    }
}
