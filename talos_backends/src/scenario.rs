// talos_backends/src/scenario.rs

//! Scenario files: one TOML document describing a complete run: control
//! loop timing, which backend to drive, the camera set, the teleop device,
//! the policy (for rollouts), and where episodes land. Backend selection
//! happens here, at configuration time; the scheduler never branches on it.

use crate::backends::{BatchedSimBackend, RigidBodyBackend, Ur5eBackend};
use crate::policies::PolicySpec;
use crate::teleop::{HoldDevice, ScriptedDevice};
use figment::providers::{Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use talos_core::adapter::Backend;
use talos_core::clock::SharedClock;
use talos_core::config::ControlConfig;
use talos_core::feeds::TeleopDevice;

/// The root of a scenario document.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub control: ControlConfig,

    pub backend: BackendConfig,

    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    #[serde(default)]
    pub teleop: TeleopConfig,

    /// Required for rollout runs; ignored for teleop collection.
    pub policy: Option<PolicySpec>,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Load a scenario from a TOML file on disk.
pub fn load(path: &Path) -> Result<Scenario, figment::Error> {
    Figment::new().merge(Toml::file(path)).extract()
}

/// Load a scenario from an inline TOML string (tests, mostly).
pub fn from_toml_str(toml: &str) -> Result<Scenario, figment::Error> {
    Figment::new().merge(Toml::string(toml)).extract()
}

// =========================================================================
// == Backend Selection ==
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "PascalCase")]
pub enum BackendConfig {
    /// Local rigid-body simulation.
    RigidBody {
        #[serde(default = "default_joints")]
        joints: usize,
        /// World/task variation seed, recorded into episode metadata.
        #[serde(default)]
        world_idx: u64,
        /// Gaussian measurement noise, standard deviation.
        #[serde(default = "default_noise_stddev")]
        noise_stddev: f64,
    },
    /// Batched simulation with a representative environment.
    Batched {
        #[serde(default = "default_joints")]
        joints: usize,
        #[serde(default = "default_num_envs")]
        num_envs: usize,
        #[serde(default)]
        world_idx: u64,
    },
    /// Physical arm behind a TCP bridge.
    Ur5e {
        host: String,
        #[serde(default = "default_ur5e_port")]
        port: u16,
        #[serde(default = "default_joints")]
        joints: usize,
        /// Link establishment and state-read timeout, in seconds.
        #[serde(default = "default_link_timeout_s")]
        link_timeout_s: f64,
    },
}

impl BackendConfig {
    pub fn kind_str(&self) -> &str {
        match self {
            BackendConfig::RigidBody { .. } => "RigidBody",
            BackendConfig::Batched { .. } => "Batched",
            BackendConfig::Ur5e { .. } => "Ur5e",
        }
    }

    pub fn joints(&self) -> usize {
        match self {
            BackendConfig::RigidBody { joints, .. }
            | BackendConfig::Batched { joints, .. }
            | BackendConfig::Ur5e { joints, .. } => *joints,
        }
    }

    /// The variation index to stamp into episode metadata, when meaningful.
    pub fn world_idx(&self) -> Option<u64> {
        match self {
            BackendConfig::RigidBody { world_idx, .. }
            | BackendConfig::Batched { world_idx, .. } => Some(*world_idx),
            BackendConfig::Ur5e { .. } => None,
        }
    }

    pub fn build(&self, clock: SharedClock) -> Arc<dyn Backend> {
        match self {
            BackendConfig::RigidBody {
                joints,
                world_idx,
                noise_stddev,
            } => Arc::new(RigidBodyBackend::new(
                clock,
                *joints,
                *world_idx,
                *noise_stddev,
            )),
            BackendConfig::Batched {
                joints,
                num_envs,
                world_idx,
            } => Arc::new(BatchedSimBackend::new(
                clock, *joints, *num_envs, *world_idx,
            )),
            BackendConfig::Ur5e {
                host,
                port,
                joints,
                link_timeout_s,
            } => Arc::new(Ur5eBackend::new(
                clock,
                host.clone(),
                *port,
                *joints,
                Duration::from_secs_f64(*link_timeout_s),
            )),
        }
    }
}

// =========================================================================
// == Cameras ==
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    /// Camera id as it appears in every frame (e.g. "front", "hand").
    pub name: String,

    /// Capture rate, in Hz.
    #[serde(default = "default_camera_rate_hz")]
    pub rate_hz: f64,

    #[serde(default = "default_camera_width")]
    pub width: u32,

    #[serde(default = "default_camera_height")]
    pub height: u32,

    /// Simulated capture latency, in seconds.
    #[serde(default)]
    pub latency_s: f64,

    #[serde(default)]
    pub seed: u64,
}

// =========================================================================
// == Teleop Device ==
// =========================================================================

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "type")]
#[serde(rename_all = "PascalCase")]
pub enum TeleopConfig {
    /// Zero deltas; the arm holds its pose.
    #[default]
    Hold,
    /// Built-in scripted operator sweeping the joints.
    Scripted {
        #[serde(default = "default_teleop_amplitude")]
        amplitude: f64,
        #[serde(default = "default_teleop_period_s")]
        period_s: f64,
    },
}

impl TeleopConfig {
    /// Device polling rate. Input hardware typically reports near 100 Hz.
    pub fn rate_hz(&self) -> f64 {
        100.0
    }

    pub fn build(&self, clock: SharedClock, joints: usize) -> Box<dyn TeleopDevice> {
        match self {
            TeleopConfig::Hold => Box::new(HoldDevice::new(joints)),
            TeleopConfig::Scripted {
                amplitude,
                period_s,
            } => Box::new(ScriptedDevice::new(clock, joints, *amplitude, *period_s)),
        }
    }
}

// =========================================================================
// == Storage ==
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Episode store directory.
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

fn default_joints() -> usize {
    6
}

fn default_noise_stddev() -> f64 {
    0.001
}

fn default_num_envs() -> usize {
    16
}

fn default_ur5e_port() -> u16 {
    30004
}

fn default_link_timeout_s() -> f64 {
    0.5
}

fn default_camera_rate_hz() -> f64 {
    30.0
}

fn default_camera_width() -> u32 {
    64
}

fn default_camera_height() -> u32 {
    48
}

fn default_teleop_amplitude() -> f64 {
    0.02
}

fn default_teleop_period_s() -> f64 {
    4.0
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_scenario_fills_defaults() {
        let scenario = from_toml_str(
            r#"
            [backend]
            type = "RigidBody"
            "#,
        )
        .unwrap();
        assert_eq!(scenario.backend.kind_str(), "RigidBody");
        assert_eq!(scenario.backend.joints(), 6);
        assert_eq!(scenario.control.tick_rate_hz, 25.0);
        assert!(scenario.cameras.is_empty());
        assert!(scenario.policy.is_none());
        assert_eq!(scenario.storage.dir, PathBuf::from("./data"));
    }

    #[test]
    fn full_scenario_parses() {
        let scenario = from_toml_str(
            r#"
            [control]
            tick_rate_hz = 10.0
            episode_limit = 50
            safe_default = "HoldPosition"

            [backend]
            type = "Batched"
            joints = 6
            num_envs = 4
            world_idx = 12

            [[cameras]]
            name = "front"
            rate_hz = 60.0
            width = 32
            height = 24

            [[cameras]]
            name = "hand"
            latency_s = 0.02

            [teleop]
            type = "Scripted"
            amplitude = 0.05

            [policy]
            family = "Diffusion"
            weights = "weights/pick.json"

            [storage]
            dir = "/tmp/talos-episodes"
            "#,
        )
        .unwrap();

        assert_eq!(scenario.control.tick_rate_hz, 10.0);
        assert_eq!(scenario.control.episode_limit, 50);
        assert_eq!(scenario.backend.world_idx(), Some(12));
        assert_eq!(scenario.cameras.len(), 2);
        assert_eq!(scenario.cameras[1].latency_s, 0.02);
        assert!(matches!(
            scenario.policy,
            Some(PolicySpec::Diffusion { .. })
        ));
    }

    #[test]
    fn ur5e_backend_has_no_world_idx() {
        let scenario = from_toml_str(
            r#"
            [backend]
            type = "Ur5e"
            host = "192.168.11.4"
            "#,
        )
        .unwrap();
        assert_eq!(scenario.backend.world_idx(), None);
        assert_eq!(scenario.backend.kind_str(), "Ur5e");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = from_toml_str(
            r#"
            [backend]
            type = "RigidBody"

            [storage]
            dir = "./data"
            compression = "zstd"
            "#,
        );
        assert!(result.is_err());
    }
}
