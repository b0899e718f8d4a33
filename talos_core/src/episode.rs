// talos_core/src/episode.rs

use crate::messages::{Action, Frame};
use crate::types::BackendId;
use serde::{Deserialize, Serialize};

/// Bumped whenever the on-disk episode layout changes incompatibly.
pub const EPISODE_SCHEMA_VERSION: u32 = 1;

/// How an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeOutcome {
    /// The task was completed (or the operator labelled the demo good).
    Success,
    /// A backend fault ended the episode, or the operator labelled it bad.
    /// Partial episodes are persisted with this label; they are valuable
    /// negative/recovery data.
    Failure,
    /// The operator cancelled without a judgement.
    Aborted,
}

/// One recorded step: the observation and the action issued for it.
/// Exactly one action per frame, by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStep {
    pub frame: Frame,
    pub action: Action,
}

/// Episode metadata, computed at finalization and embedded atomically with
/// the step data so a reader never sees a half-written episode as valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMeta {
    pub schema_version: u32,
    pub backend: BackendId,
    /// Identity of the policy that drove the rollout; absent for teleop.
    pub policy: Option<String>,
    /// Configured control tick period, in seconds.
    pub tick_period: f64,
    /// Must equal the number of recorded steps.
    pub frame_count: usize,
    /// First and last frame timestamps on the run's monotonic clock.
    pub started_at: f64,
    pub ended_at: f64,
    pub duration: f64,
    /// World/task variation index the backend was seeded with, if any.
    pub world_idx: Option<u64>,
    pub outcome: EpisodeOutcome,
    /// Ticks whose processing overran the tick budget, for diagnostics.
    pub overrun_ticks: u64,
    /// Wall-clock creation stamp (Unix milliseconds), used for file naming.
    pub created_unix_ms: u64,
}

/// One recorded or executed task attempt, from start to stop/fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub meta: EpisodeMeta,
    pub steps: Vec<EpisodeStep>,
}

impl Episode {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Accumulates steps for the episode in progress and seals them into an
/// [`Episode`] with consistent metadata.
#[derive(Debug)]
pub struct EpisodeBuilder {
    backend: BackendId,
    policy: Option<String>,
    tick_period: f64,
    world_idx: Option<u64>,
    steps: Vec<EpisodeStep>,
}

impl EpisodeBuilder {
    pub fn new(
        backend: BackendId,
        policy: Option<String>,
        tick_period: f64,
        world_idx: Option<u64>,
    ) -> Self {
        Self {
            backend,
            policy,
            tick_period,
            world_idx,
            steps: Vec::new(),
        }
    }

    pub fn append(&mut self, frame: Frame, action: Action) {
        self.steps.push(EpisodeStep { frame, action });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Seal the builder. Counts, span, and duration are derived from the
    /// recorded steps here, in one place.
    pub fn finish(
        self,
        outcome: EpisodeOutcome,
        overrun_ticks: u64,
        created_unix_ms: u64,
    ) -> Episode {
        let started_at = self.steps.first().map(|s| s.frame.timestamp).unwrap_or(0.0);
        let ended_at = self.steps.last().map(|s| s.frame.timestamp).unwrap_or(started_at);
        let meta = EpisodeMeta {
            schema_version: EPISODE_SCHEMA_VERSION,
            backend: self.backend,
            policy: self.policy,
            tick_period: self.tick_period,
            frame_count: self.steps.len(),
            started_at,
            ended_at,
            duration: ended_at - started_at,
            world_idx: self.world_idx,
            outcome,
            overrun_ticks,
            created_unix_ms,
        };
        Episode {
            meta,
            steps: self.steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ActionSource, JointState};
    use crate::types::JointVector;
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeMap;

    fn step_at(t: f64) -> (Frame, Action) {
        let frame = Frame {
            timestamp: t,
            joints: JointState {
                positions: JointVector::from_vec(vec![0.0, 1.0]),
                velocities: JointVector::zeros(2),
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
    fn finish_derives_counts_and_span() {
        let mut builder =
            EpisodeBuilder::new(BackendId::from("test"), None, 0.1, Some(3));
        for i in 0..5 {
            let (frame, action) = step_at(1.0 + 0.1 * i as f64);
            builder.append(frame, action);
        }
        let episode = builder.finish(EpisodeOutcome::Success, 2, 1234);
        assert_eq!(episode.meta.frame_count, 5);
        assert_eq!(episode.len(), 5);
        assert_abs_diff_eq!(episode.meta.started_at, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(episode.meta.duration, 0.4, epsilon = 1e-12);
        assert_eq!(episode.meta.world_idx, Some(3));
        assert_eq!(episode.meta.overrun_ticks, 2);
        assert_eq!(episode.meta.schema_version, EPISODE_SCHEMA_VERSION);
    }

    #[test]
    fn empty_episode_has_zero_span() {
        let builder = EpisodeBuilder::new(BackendId::from("test"), None, 0.1, None);
        let episode = builder.finish(EpisodeOutcome::Aborted, 0, 0);
        assert!(episode.is_empty());
        assert_eq!(episode.meta.duration, 0.0);
    }
}
