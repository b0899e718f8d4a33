// talos_backends/src/teleop.rs

//! Teleoperation input devices. A real SpaceMouse or gamepad driver plugs in
//! behind `talos_core`'s `TeleopDevice` trait; what lives here are the
//! built-in devices: a scripted operator for demo generation and tests, and
//! a hold-still device.

use nalgebra::DVector;
use std::f64::consts::TAU;
use talos_core::clock::SharedClock;
use talos_core::errors::FeedError;
use talos_core::feeds::TeleopDevice;
use talos_core::messages::TeleopSample;

/// Replays a smooth joint-space sweep, like an operator tracing a slow
/// figure across the workspace. Deterministic in the run clock.
pub struct ScriptedDevice {
    clock: SharedClock,
    joints: usize,
    amplitude: f64,
    period_s: f64,
    /// Press the stop button at this time, if set.
    stop_after_s: Option<f64>,
}

impl ScriptedDevice {
    pub fn new(clock: SharedClock, joints: usize, amplitude: f64, period_s: f64) -> Self {
        Self {
            clock,
            joints,
            amplitude,
            period_s: period_s.max(1e-3),
            stop_after_s: None,
        }
    }

    pub fn with_stop_after(mut self, stop_after_s: f64) -> Self {
        self.stop_after_s = Some(stop_after_s);
        self
    }
}

impl TeleopDevice for ScriptedDevice {
    fn poll(&mut self) -> Result<TeleopSample, FeedError> {
        let t = self.clock.now();
        let phase = TAU * t / self.period_s;
        let joint_delta = DVector::from_fn(self.joints, |i, _| {
            self.amplitude * (phase + i as f64 * TAU / self.joints.max(1) as f64).sin()
        });
        Ok(TeleopSample {
            joint_delta,
            // Ease the gripper open and closed without ever commanding past
            // its lower bound.
            gripper_delta: 0.25 * self.amplitude * (1.0 + phase.cos()),
            stop_requested: self.stop_after_s.map(|s| t >= s).unwrap_or(false),
        })
    }
}

/// Produces zero deltas: the arm holds its pose until someone else says
/// otherwise. Useful as a stand-in when no input hardware is present.
pub struct HoldDevice {
    joints: usize,
}

impl HoldDevice {
    pub fn new(joints: usize) -> Self {
        Self { joints }
    }
}

impl TeleopDevice for HoldDevice {
    fn poll(&mut self) -> Result<TeleopSample, FeedError> {
        Ok(TeleopSample::zero(self.joints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use talos_core::clock::ManualClock;

    #[test]
    fn scripted_device_sweeps_and_stops() {
        let clock = ManualClock::new();
        let mut device =
            ScriptedDevice::new(Arc::new(clock.clone()), 3, 0.05, 2.0).with_stop_after(1.0);

        clock.set(0.5);
        let sample = device.poll().unwrap();
        assert_eq!(sample.joint_delta.len(), 3);
        assert!(!sample.stop_requested);
        assert!(sample.joint_delta.amax() <= 0.05 + 1e-12);

        clock.set(1.5);
        assert!(device.poll().unwrap().stop_requested);
    }

    #[test]
    fn hold_device_never_moves() {
        let mut device = HoldDevice::new(6);
        let sample = device.poll().unwrap();
        assert_eq!(sample.joint_delta, DVector::zeros(6));
        assert_eq!(sample.gripper_delta, 0.0);
        assert!(!sample.stop_requested);
    }
}
