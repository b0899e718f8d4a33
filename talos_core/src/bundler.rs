// talos_core/src/bundler.rs

use crate::latest::Latest;
use crate::messages::{CameraFrame, CameraSample, Frame, JointState, RawState};
use crate::types::CameraId;
use std::collections::BTreeMap;
use tracing::debug;

/// Merges one raw backend state with the newest available frame from each
/// registered camera into a single [`Frame`].
///
/// Policy: a camera frame older than the staleness bound (relative to the
/// state timestamp) does not block the bundle: the frame is included and
/// the bundle is flagged `stale_vision`. Per-camera capture latency is
/// always recorded.
pub struct ObservationBundler {
    cameras: BTreeMap<CameraId, Latest<CameraFrame>>,
    staleness_bound: f64,
}

impl ObservationBundler {
    /// `staleness_bound` is in seconds on the run's monotonic clock.
    pub fn new(staleness_bound: f64) -> Self {
        Self {
            cameras: BTreeMap::new(),
            staleness_bound,
        }
    }

    /// Register the latest-value cell a camera feed publishes into.
    pub fn add_camera(&mut self, id: CameraId, cell: Latest<CameraFrame>) {
        self.cameras.insert(id, cell);
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    pub fn staleness_bound(&self) -> f64 {
        self.staleness_bound
    }

    /// Produce one frame from `raw` and the newest camera data. Never blocks.
    pub fn bundle(&self, raw: RawState) -> Frame {
        let mut cameras = BTreeMap::new();
        let mut stale_vision = false;

        for (id, cell) in &self.cameras {
            match cell.peek() {
                Some(frame) => {
                    let latency = (raw.timestamp - frame.captured_at).max(0.0);
                    if latency > self.staleness_bound {
                        debug!(camera = %id, latency, "camera frame is stale");
                        stale_vision = true;
                    }
                    cameras.insert(
                        id.clone(),
                        CameraSample {
                            image: frame.image,
                            captured_at: frame.captured_at,
                            latency,
                        },
                    );
                }
                None => {
                    // Nothing captured yet. Bundle without it rather than wait.
                    debug!(camera = %id, "no camera frame available yet");
                    stale_vision = true;
                }
            }
        }

        Frame {
            timestamp: raw.timestamp,
            joints: JointState {
                positions: raw.joint_pos,
                velocities: raw.joint_vel,
            },
            gripper_pos: raw.gripper_pos,
            cameras,
            wrench: raw.wrench,
            stale_vision,
        }
    }
}
