// talos_core/src/policy.rs

use crate::errors::PolicyError;
use crate::messages::{Action, Frame};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::any::Any;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Whether a runner carries hidden context across ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyCapability {
    /// Each inference depends only on the current frame.
    Stateless,
    /// Inference carries state across ticks (recurrent hidden state, a
    /// context window of past frames, ...). Must be reset between episodes.
    Stateful,
}

// --- POLICY RUNNER TRAIT ---
/// The contract for a loaded policy: `infer(observation) -> action`,
/// backend-agnostic. Variants cover the different policy families
/// (recurrent single-step, context-window, multi-step denoising); the
/// capability tag keeps the scheduler's handling uniform across them.
pub trait PolicyRunner: Send + std::fmt::Debug {
    /// Stable identity, recorded in episode metadata.
    fn identity(&self) -> &str;

    fn capability(&self) -> PolicyCapability;

    /// Clear hidden context. Called once at the start of every episode;
    /// a no-op for stateless runners.
    fn reset(&mut self);

    /// Produce one action for one observation.
    fn infer(&mut self, frame: &Frame) -> Result<Action, PolicyError>;

    /// Dynamic access to runner-specific methods if a caller needs them.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A completed inference with its measured latency. The runner reports the
/// latency; what to do about a slow one is the scheduler's decision.
#[derive(Debug, Clone)]
pub struct Inference {
    pub action: Action,
    pub latency: Duration,
}

/// What the scheduler sees from one bounded-wait inference call.
#[derive(Debug)]
pub enum InferenceOutcome {
    Ready(Inference),
    /// No answer within the deadline. The straggling result, if it ever
    /// arrives, is discarded before the next request.
    TimedOut,
    Failed(PolicyError),
}

enum WorkerRequest {
    Infer(Box<Frame>),
    Reset,
}

/// Runs a boxed [`PolicyRunner`] on its own thread and answers inference
/// requests with a bounded wait, so GPU-bound multi-step inference can never
/// hold the control loop past its timeout.
pub struct InferenceWorker {
    identity: String,
    capability: PolicyCapability,
    req_tx: Sender<WorkerRequest>,
    resp_rx: Receiver<Result<Inference, PolicyError>>,
    in_flight: bool,
    _join: JoinHandle<()>,
}

impl InferenceWorker {
    pub fn spawn(mut runner: Box<dyn PolicyRunner>) -> Self {
        let identity = runner.identity().to_string();
        let capability = runner.capability();
        let (req_tx, req_rx) = bounded::<WorkerRequest>(1);
        let (resp_tx, resp_rx) = bounded::<Result<Inference, PolicyError>>(1);

        let join = thread::Builder::new()
            .name(format!("policy-{identity}"))
            .spawn(move || {
                for request in req_rx.iter() {
                    match request {
                        WorkerRequest::Reset => runner.reset(),
                        WorkerRequest::Infer(frame) => {
                            let started = Instant::now();
                            let result = runner.infer(&frame).map(|action| Inference {
                                action,
                                latency: started.elapsed(),
                            });
                            if resp_tx.send(result).is_err() {
                                return;
                            }
                        }
                    }
                }
            })
            .expect("spawn policy worker thread");

        Self {
            identity,
            capability,
            req_tx,
            resp_rx,
            in_flight: false,
            _join: join,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn capability(&self) -> PolicyCapability {
        self.capability
    }

    /// Clear the runner's hidden context for a new episode. The reset is
    /// queued behind any inference still running.
    pub fn reset(&mut self) -> Result<(), PolicyError> {
        self.drain_straggler();
        self.req_tx
            .send(WorkerRequest::Reset)
            .map_err(|_| PolicyError::WorkerGone)
    }

    /// Request one action, waiting at most `timeout`.
    ///
    /// If a previous request timed out and its result has since arrived, the
    /// stale result is discarded here. If the worker is still busy with it,
    /// this reports `TimedOut` again without queuing more work; the
    /// scheduler substitutes its safe default either way.
    pub fn infer_bounded(&mut self, frame: &Frame, timeout: Duration) -> InferenceOutcome {
        if self.in_flight && !self.drain_straggler() {
            debug!(policy = %self.identity, "worker still busy with a timed-out request");
            return InferenceOutcome::TimedOut;
        }

        if self
            .req_tx
            .send(WorkerRequest::Infer(Box::new(frame.clone())))
            .is_err()
        {
            return InferenceOutcome::Failed(PolicyError::WorkerGone);
        }
        self.in_flight = true;

        match self.resp_rx.recv_timeout(timeout) {
            Ok(Ok(inference)) => {
                self.in_flight = false;
                InferenceOutcome::Ready(inference)
            }
            Ok(Err(e)) => {
                self.in_flight = false;
                InferenceOutcome::Failed(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(policy = %self.identity, ?timeout, "inference timed out");
                InferenceOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => {
                InferenceOutcome::Failed(PolicyError::WorkerGone)
            }
        }
    }

    /// Throw away a straggling result from a timed-out request. Returns true
    /// when the worker is idle again.
    fn drain_straggler(&mut self) -> bool {
        if !self.in_flight {
            return true;
        }
        match self.resp_rx.try_recv() {
            Ok(_) => {
                debug!(policy = %self.identity, "discarded straggling inference result");
                self.in_flight = false;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.in_flight = false;
                true
            }
        }
    }
}
