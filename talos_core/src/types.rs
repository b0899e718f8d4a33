// talos_core/src/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;

// --- Core Type Aliases ---
pub type JointVector = nalgebra::DVector<f64>;
/// Six-axis force/torque: (fx, fy, fz, nx, ny, nz) in the wrist frame.
pub type Wrench = nalgebra::Vector6<f64>;

// --- Core Identifiers ---

/// Identifies one backend instance (e.g. "mujoco_ur5e", "isaac_ur5e", "real_ur5e").
/// On disk this is part of every episode's metadata and file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendId(pub String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies one camera within a backend (e.g. "front", "side", "hand").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A value paired with the monotonic time it was produced at.
/// Producers stamp on publication so consumers can judge staleness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub value: T,
    pub timestamp: f64,
}

impl<T> Stamped<T> {
    pub fn new(value: T, timestamp: f64) -> Self {
        Self { value, timestamp }
    }

    /// Age of this sample relative to `now`, clamped at zero.
    pub fn age(&self, now: f64) -> f64 {
        (now - self.timestamp).max(0.0)
    }
}
