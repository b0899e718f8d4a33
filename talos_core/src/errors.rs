// talos_core/src/errors.rs

use crate::types::CameraId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Faults a backend adapter can raise. The scheduler decides which of these
/// are tick-local (absorbed, safe default substituted) and which are
/// session-level (episode preserved, session moves to Faulted).
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The underlying link is gone. Session-level.
    #[error("backend link unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend refused an out-of-range or unsafe target. Tick-local.
    #[error("command rejected by backend: {0}")]
    CommandRejected(String),

    /// The backend did not acknowledge within the caller-supplied timeout.
    /// Tick-local; the adapter must return rather than hang the loop.
    #[error("command not acknowledged within {timeout:?}")]
    CommandTimeout { timeout: Duration },

    /// A session is already held for this backend. Rejected at connect time,
    /// no state change.
    #[error("a session is already active for this backend")]
    SessionBusy,
}

impl AdapterError {
    /// Whether this fault ends the session (as opposed to a single tick).
    pub fn is_session_fault(&self) -> bool {
        matches!(self, AdapterError::BackendUnavailable(_))
    }
}

/// Faults from camera sources and human-input devices. Feeds log these and
/// keep polling; the staleness policy surfaces persistent ones.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("camera '{0}' unavailable: {1}")]
    CameraUnavailable(CameraId, String),

    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Faults from policy loading and inference.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to load policy '{identity}': {reason}")]
    LoadFailed { identity: String, reason: String },

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// The inference worker thread is gone.
    #[error("inference worker has shut down")]
    WorkerGone,
}

/// Faults from the episode recorder. Losing a demonstration is a
/// user-visible failure, never a log line.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Persistence failed even after the retry. The episode data could not
    /// be written; the reason is surfaced to the caller.
    #[error("episode storage write failed after {attempts} attempts: {reason}")]
    StorageWriteError { attempts: u32, reason: String },

    #[error("an episode is already in progress")]
    EpisodeInProgress,

    #[error("no episode is in progress")]
    NoEpisodeInProgress,

    /// The background writer thread is gone.
    #[error("episode writer has shut down")]
    WriterGone,
}

/// Faults from the on-disk episode store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed episode file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}
