// talos_core/src/recorder.rs

//! Episode recording. The control loop appends (frame, action) pairs on its
//! own thread; persistence runs on a background writer so the loop's timing
//! is never gated by disk I/O. The writer's queue is bounded: when it is
//! full, `finalize` blocks (backpressure) instead of dropping data.

use crate::episode::{Episode, EpisodeBuilder, EpisodeOutcome};
use crate::errors::RecorderError;
use crate::messages::{Action, Frame};
use crate::storage::EpisodeStore;
use crate::types::BackendId;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

struct WriterJob {
    episode: Episode,
    seq: u64,
    reply: Sender<Result<PathBuf, RecorderError>>,
}

/// Ticket for one finalized episode. `wait` blocks until the background
/// writer has persisted it (or given up) and surfaces the result; a failed
/// write is an error the caller sees, never a silent drop.
pub struct EpisodeHandle {
    seq: u64,
    reply: Receiver<Result<PathBuf, RecorderError>>,
}

impl EpisodeHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Whether the writer has already resolved this episode.
    pub fn is_ready(&self) -> bool {
        !self.reply.is_empty()
    }

    pub fn wait(self) -> Result<PathBuf, RecorderError> {
        self.reply
            .recv()
            .unwrap_or(Err(RecorderError::WriterGone))
    }
}

/// Buffers the episode in progress and hands completed episodes to the
/// background writer. Owned by the control loop scheduler.
pub struct EpisodeRecorder {
    job_tx: Option<Sender<WriterJob>>,
    writer: Option<JoinHandle<()>>,
    current: Option<EpisodeBuilder>,
    next_seq: u64,
}

impl EpisodeRecorder {
    /// Spawn the writer thread over `store`. `queue_depth` bounds how many
    /// completed episodes may be pending on disk at once; `retry_backoff` is
    /// the delay before the single write retry.
    pub fn new(store: EpisodeStore, queue_depth: usize, retry_backoff: Duration) -> Self {
        let (job_tx, job_rx) = bounded::<WriterJob>(queue_depth.max(1));
        let writer = thread::Builder::new()
            .name("episode-writer".to_string())
            .spawn(move || writer_loop(store, job_rx, retry_backoff))
            .expect("spawn episode writer thread");

        Self {
            job_tx: Some(job_tx),
            writer: Some(writer),
            current: None,
            next_seq: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    /// Number of steps recorded in the episode in progress.
    pub fn frame_count(&self) -> usize {
        self.current.as_ref().map(EpisodeBuilder::len).unwrap_or(0)
    }

    /// Open a new episode.
    pub fn begin(
        &mut self,
        backend: BackendId,
        policy: Option<String>,
        tick_period: f64,
        world_idx: Option<u64>,
    ) -> Result<(), RecorderError> {
        if self.current.is_some() {
            return Err(RecorderError::EpisodeInProgress);
        }
        self.current = Some(EpisodeBuilder::new(backend, policy, tick_period, world_idx));
        Ok(())
    }

    pub fn append(&mut self, frame: Frame, action: Action) -> Result<(), RecorderError> {
        let builder = self
            .current
            .as_mut()
            .ok_or(RecorderError::NoEpisodeInProgress)?;
        builder.append(frame, action);
        Ok(())
    }

    /// Seal the episode in progress and queue it for persistence. Blocks if
    /// the writer queue is full.
    pub fn finalize(
        &mut self,
        outcome: EpisodeOutcome,
        overrun_ticks: u64,
    ) -> Result<EpisodeHandle, RecorderError> {
        let builder = self
            .current
            .take()
            .ok_or(RecorderError::NoEpisodeInProgress)?;
        let episode = builder.finish(outcome, overrun_ticks, unix_millis());
        let seq = self.next_seq;
        self.next_seq += 1;

        info!(
            seq,
            frames = episode.meta.frame_count,
            outcome = ?episode.meta.outcome,
            "episode finalized"
        );

        let (reply_tx, reply_rx) = bounded(1);
        let job = WriterJob {
            episode,
            seq,
            reply: reply_tx,
        };
        self.job_tx
            .as_ref()
            .ok_or(RecorderError::WriterGone)?
            .send(job)
            .map_err(|_| RecorderError::WriterGone)?;

        Ok(EpisodeHandle {
            seq,
            reply: reply_rx,
        })
    }

    /// Stop accepting episodes and wait for pending writes to land.
    pub fn shutdown(mut self) {
        self.shut_down();
    }

    fn shut_down(&mut self) {
        // Closing the channel lets the writer drain and exit.
        self.job_tx.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

impl Drop for EpisodeRecorder {
    fn drop(&mut self) {
        self.shut_down();
    }
}

fn writer_loop(store: EpisodeStore, jobs: Receiver<WriterJob>, retry_backoff: Duration) {
    for job in jobs.iter() {
        let result = persist_with_retry(&store, &job.episode, job.seq, retry_backoff);
        // The handle may have been dropped; persistence already happened
        // (or was logged), so a missing receiver is fine.
        let _ = job.reply.send(result);
    }
}

/// One attempt plus one retry with backoff. Failures are logged and the
/// final error is surfaced through the episode handle.
fn persist_with_retry(
    store: &EpisodeStore,
    episode: &Episode,
    seq: u64,
    retry_backoff: Duration,
) -> Result<PathBuf, RecorderError> {
    const MAX_ATTEMPTS: u32 = 2;
    let mut backoff = retry_backoff;
    let mut last_reason = String::new();

    for attempt in 1..=MAX_ATTEMPTS {
        match store.write(episode, seq) {
            Ok(path) => {
                info!(seq, path = %path.display(), "episode persisted");
                return Ok(path);
            }
            Err(e) => {
                last_reason = e.to_string();
                warn!(seq, attempt, error = %last_reason, "episode write failed");
                if attempt < MAX_ATTEMPTS {
                    thread::sleep(backoff);
                    backoff *= 2;
                }
            }
        }
    }

    error!(seq, reason = %last_reason, "episode write gave up; surfacing to caller");
    Err(RecorderError::StorageWriteError {
        attempts: MAX_ATTEMPTS,
        reason: last_reason,
    })
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ActionSource, JointState};
    use crate::storage::EpisodeStore;
    use crate::types::JointVector;
    use std::collections::BTreeMap;

    fn step(t: f64) -> (Frame, Action) {
        let frame = Frame {
            timestamp: t,
            joints: JointState {
                positions: JointVector::from_vec(vec![t]),
                velocities: JointVector::zeros(1),
            },
            gripper_pos: 0.0,
            cameras: BTreeMap::new(),
            wrench: None,
            stale_vision: false,
        };
        let action = Action::hold_position(&frame, ActionSource::Teleop);
        (frame, action)
    }

    #[test]
    fn finalize_persists_and_resolves_handle() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = EpisodeRecorder::new(
            EpisodeStore::new(dir.path()),
            2,
            Duration::from_millis(1),
        );

        recorder
            .begin(BackendId::from("rec_test"), None, 0.1, None)
            .unwrap();
        for i in 0..4 {
            let (frame, action) = step(i as f64 * 0.1);
            recorder.append(frame, action).unwrap();
        }
        let handle = recorder.finalize(EpisodeOutcome::Success, 0).unwrap();
        let path = handle.wait().unwrap();

        let episode = EpisodeStore::read_file(&path).unwrap();
        assert_eq!(episode.meta.frame_count, 4);
        assert_eq!(episode.meta.outcome, EpisodeOutcome::Success);
    }

    #[test]
    fn write_failure_is_surfaced_not_dropped() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the store directory should be makes every write fail.
        let blocked = dir.path().join("store");
        std::fs::write(&blocked, b"in the way").unwrap();

        let mut recorder =
            EpisodeRecorder::new(EpisodeStore::new(&blocked), 1, Duration::from_millis(1));
        recorder
            .begin(BackendId::from("rec_test"), None, 0.1, None)
            .unwrap();
        let (frame, action) = step(0.0);
        recorder.append(frame, action).unwrap();

        let handle = recorder.finalize(EpisodeOutcome::Failure, 0).unwrap();
        match handle.wait() {
            Err(RecorderError::StorageWriteError { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected StorageWriteError, got {other:?}"),
        }
    }

    #[test]
    fn append_without_begin_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = EpisodeRecorder::new(
            EpisodeStore::new(dir.path()),
            1,
            Duration::from_millis(1),
        );
        let (frame, action) = step(0.0);
        assert!(matches!(
            recorder.append(frame, action),
            Err(RecorderError::NoEpisodeInProgress)
        ));
    }

    #[test]
    fn double_begin_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = EpisodeRecorder::new(
            EpisodeStore::new(dir.path()),
            1,
            Duration::from_millis(1),
        );
        recorder
            .begin(BackendId::from("rec_test"), None, 0.1, None)
            .unwrap();
        assert!(matches!(
            recorder.begin(BackendId::from("rec_test"), None, 0.1, None),
            Err(RecorderError::EpisodeInProgress)
        ));
    }
}
