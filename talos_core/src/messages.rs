// talos_core/src/messages.rs

use crate::types::{CameraId, JointVector, Wrench};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =========================================================================
// == Backend-Facing Data Structures ==
// =========================================================================

/// One raw sample of the robot's proprioceptive state, straight from a
/// backend adapter. Camera data arrives separately through the feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawState {
    /// When the sample was taken, on the run's monotonic clock.
    pub timestamp: f64,
    pub joint_pos: JointVector,
    pub joint_vel: JointVector,
    pub gripper_pos: f64,
    /// Wrist force/torque, when the backend has a sensor for it.
    pub wrench: Option<Wrench>,
}

/// Acknowledgement a backend returns for an accepted command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandAck {
    /// When the backend accepted the command, on the run's monotonic clock.
    pub accepted_at: f64,
}

// =========================================================================
// == Vision Data Structures ==
// =========================================================================

/// A raw RGB8 image buffer, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl CameraImage {
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// One captured camera frame with its capture timestamp, as published by a
/// camera feed into its latest-value cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraFrame {
    pub image: CameraImage,
    /// Capture time on the run's monotonic clock.
    pub captured_at: f64,
}

/// A camera frame as bundled into a `Frame`. The latency relative to the
/// state sample is recorded, not discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSample {
    pub image: CameraImage,
    pub captured_at: f64,
    /// `state.timestamp - captured_at`, clamped at zero.
    pub latency: f64,
}

// =========================================================================
// == The Bundled Observation ==
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub positions: JointVector,
    pub velocities: JointVector,
}

/// One multi-modal observation, captured within a single control tick.
/// Every field shares the run's monotonic clock; cross-modal skew is bounded
/// by the bundler's staleness policy or flagged via `stale_vision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: f64,
    pub joints: JointState,
    pub gripper_pos: f64,
    pub cameras: BTreeMap<CameraId, CameraSample>,
    pub wrench: Option<Wrench>,
    /// Set when any camera's newest frame was older than the staleness bound
    /// (or a camera had produced nothing yet). The bundle is still produced;
    /// the loop never stalls on a slow sensor.
    pub stale_vision: bool,
}

// =========================================================================
// == Actions ==
// =========================================================================

/// Who produced an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    Teleop,
    Policy,
}

/// One command for the backend: joint-space target plus gripper target.
/// Exactly one action is recorded per frame in an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub joint_target: JointVector,
    pub gripper_target: f64,
    pub source: ActionSource,
}

impl Action {
    /// An action that holds the pose observed in `frame`.
    pub fn hold_position(frame: &Frame, source: ActionSource) -> Self {
        Self {
            joint_target: frame.joints.positions.clone(),
            gripper_target: frame.gripper_pos,
            source,
        }
    }
}

// =========================================================================
// == Teleoperation Input ==
// =========================================================================

/// One raw sample from a human input device, at whatever rate the device
/// produces them. The bundler/scheduler downsample to the control tick by
/// only ever reading the newest sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TeleopSample {
    /// Joint-space delta to apply to the currently observed position.
    pub joint_delta: JointVector,
    pub gripper_delta: f64,
    /// Device-side stop button. Takes effect before any action is sent.
    pub stop_requested: bool,
}

impl TeleopSample {
    /// A no-motion sample for `n` joints.
    pub fn zero(n: usize) -> Self {
        Self {
            joint_delta: JointVector::zeros(n),
            gripper_delta: 0.0,
            stop_requested: false,
        }
    }
}
