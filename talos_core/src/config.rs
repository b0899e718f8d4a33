// talos_core/src/config.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the scheduler sends when the intended action is unavailable (policy
/// inference timed out) or was refused by the backend (rejected/timed out
/// command): never a null or garbage action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SafeDefault {
    /// Re-issue the last successfully sent action. Falls back to holding the
    /// observed position while no action has been sent yet.
    #[default]
    HoldLast,
    /// Target the currently observed joint positions.
    HoldPosition,
}

// =========================================================================
// == Control Loop Configuration ==
// =========================================================================

/// All timing and safety knobs of the control loop. Every option has a
/// documented default and an explicit override in the scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    /// Control tick rate, in Hz.
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: f64,

    /// A camera frame older than this (relative to the state sample, in
    /// seconds) marks the bundle `stale_vision`.
    #[serde(default = "default_camera_staleness_s")]
    pub camera_staleness_s: f64,

    /// Longest the loop waits on policy inference before substituting the
    /// safe default, in seconds.
    #[serde(default = "default_inference_timeout_s")]
    pub inference_timeout_s: f64,

    /// Longest the loop waits for a backend command acknowledgement, in
    /// seconds.
    #[serde(default = "default_command_timeout_s")]
    pub command_timeout_s: f64,

    /// Episode length limit, in ticks. Recording stops when reached.
    #[serde(default = "default_episode_limit")]
    pub episode_limit: usize,

    /// This many consecutive rejected/timed-out commands escalate a
    /// tick-local fault to a session fault.
    #[serde(default = "default_max_consecutive_command_faults")]
    pub max_consecutive_command_faults: u32,

    /// How many completed episodes may wait on the background writer before
    /// `finalize` blocks.
    #[serde(default = "default_writer_queue_depth")]
    pub writer_queue_depth: usize,

    /// Delay before the single storage-write retry, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub safe_default: SafeDefault,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate_hz(),
            camera_staleness_s: default_camera_staleness_s(),
            inference_timeout_s: default_inference_timeout_s(),
            command_timeout_s: default_command_timeout_s(),
            episode_limit: default_episode_limit(),
            max_consecutive_command_faults: default_max_consecutive_command_faults(),
            writer_queue_depth: default_writer_queue_depth(),
            retry_backoff_ms: default_retry_backoff_ms(),
            safe_default: SafeDefault::default(),
        }
    }
}

impl ControlConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz)
    }

    pub fn tick_period_s(&self) -> f64 {
        1.0 / self.tick_rate_hz
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.inference_timeout_s)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_timeout_s)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_tick_rate_hz() -> f64 {
    25.0
}

fn default_camera_staleness_s() -> f64 {
    0.15
}

fn default_inference_timeout_s() -> f64 {
    0.25
}

fn default_command_timeout_s() -> f64 {
    0.05
}

fn default_episode_limit() -> usize {
    1000
}

fn default_max_consecutive_command_faults() -> u32 {
    5
}

fn default_writer_queue_depth() -> usize {
    4
}

fn default_retry_backoff_ms() -> u64 {
    250
}
