// talos_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::adapter::{Backend, BackendAdapter, BackendSession, SessionLease, SessionSlot};
pub use crate::feeds::{CameraSource, TeleopDevice};
pub use crate::policy::{InferenceWorker, PolicyCapability, PolicyRunner};

// --- Core Data Structures (The "nouns" of the library) ---
pub use crate::episode::{Episode, EpisodeMeta, EpisodeOutcome, EpisodeStep};
pub use crate::messages::{
    Action, ActionSource, CameraFrame, CameraImage, CameraSample, CommandAck, Frame, JointState,
    RawState, TeleopSample,
};
pub use crate::types::{BackendId, CameraId, JointVector, Stamped, Wrench};

// --- The Loop and Its Collaborators ---
pub use crate::bundler::ObservationBundler;
pub use crate::clock::{Clock, ManualClock, MonotonicClock, SharedClock};
pub use crate::config::{ControlConfig, SafeDefault};
pub use crate::latest::Latest;
pub use crate::recorder::{EpisodeHandle, EpisodeRecorder};
pub use crate::scheduler::{
    ActionProvider, ControlLoop, EpisodeReport, LoopState, StopHandle, TickStats,
};
pub use crate::storage::EpisodeStore;

// --- Errors ---
pub use crate::errors::{AdapterError, FeedError, PolicyError, RecorderError, StorageError};
pub use crate::scheduler::LoopError;
