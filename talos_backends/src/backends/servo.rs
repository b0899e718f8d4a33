// talos_backends/src/backends/servo.rs

//! Shared servo-tracking arm model used by the simulated backends: each
//! joint follows its commanded target with first-order dynamics under a
//! velocity limit, which is close enough to a position-servoed arm for
//! data-collection purposes.

use nalgebra::DVector;
use std::f64::consts::{FRAC_PI_2, PI};
use talos_core::prelude::{Action, Wrench};

/// Internal integration step, matching the fine timestep the loop's tick
/// period is subdivided into.
pub(crate) const SIM_DT: f64 = 0.004;

const JOINT_LIMIT: f64 = 2.0 * PI;
const GRIPPER_RANGE: (f64, f64) = (0.0, 255.0);
const MAX_JOINT_SPEED: f64 = 3.0; // rad/s
const MAX_GRIPPER_SPEED: f64 = 500.0; // units/s
const TIME_CONSTANT: f64 = 0.08; // s

pub(crate) struct ServoArm {
    joint_pos: DVector<f64>,
    joint_vel: DVector<f64>,
    joint_target: DVector<f64>,
    gripper_pos: f64,
    gripper_target: f64,
}

impl ServoArm {
    /// Arm at the manipulation home pose. Six joints get the elbow-up UR
    /// configuration; any other count starts at zero.
    pub fn home(joints: usize) -> Self {
        let joint_pos = if joints == 6 {
            DVector::from_vec(vec![0.0, -FRAC_PI_2, FRAC_PI_2, -FRAC_PI_2, -FRAC_PI_2, 0.0])
        } else {
            DVector::zeros(joints)
        };
        Self {
            joint_target: joint_pos.clone(),
            joint_vel: DVector::zeros(joints),
            joint_pos,
            gripper_pos: GRIPPER_RANGE.0,
            gripper_target: GRIPPER_RANGE.0,
        }
    }

    /// Offset the starting pose, used for world/task variation.
    pub fn perturb_start(&mut self, offsets: &DVector<f64>) {
        if offsets.len() == self.joint_pos.len() {
            self.joint_pos += offsets;
            self.joint_target = self.joint_pos.clone();
        }
    }

    pub fn joint_count(&self) -> usize {
        self.joint_pos.len()
    }

    pub fn positions(&self) -> &DVector<f64> {
        &self.joint_pos
    }

    pub fn velocities(&self) -> &DVector<f64> {
        &self.joint_vel
    }

    pub fn gripper(&self) -> f64 {
        self.gripper_pos
    }

    /// Validate and latch new targets. The error string names the offending
    /// component for the `CommandRejected` report.
    pub fn set_targets(&mut self, action: &Action) -> Result<(), String> {
        if action.joint_target.len() != self.joint_pos.len() {
            return Err(format!(
                "expected {} joint targets, got {}",
                self.joint_pos.len(),
                action.joint_target.len()
            ));
        }
        for (i, target) in action.joint_target.iter().enumerate() {
            if !target.is_finite() || target.abs() > JOINT_LIMIT {
                return Err(format!("joint {i} target {target} outside ±{JOINT_LIMIT:.3}"));
            }
        }
        if !action.gripper_target.is_finite()
            || action.gripper_target < GRIPPER_RANGE.0
            || action.gripper_target > GRIPPER_RANGE.1
        {
            return Err(format!(
                "gripper target {} outside [{}, {}]",
                action.gripper_target, GRIPPER_RANGE.0, GRIPPER_RANGE.1
            ));
        }
        self.joint_target = action.joint_target.clone();
        self.gripper_target = action.gripper_target;
        Ok(())
    }

    /// Advance the arm by `elapsed` seconds in fixed `SIM_DT` sub-steps.
    pub fn advance(&mut self, elapsed: f64) {
        let mut remaining = elapsed.max(0.0);
        while remaining > 0.0 {
            let dt = remaining.min(SIM_DT);
            self.step(dt);
            remaining -= dt;
        }
    }

    fn step(&mut self, dt: f64) {
        for i in 0..self.joint_pos.len() {
            let raw = (self.joint_target[i] - self.joint_pos[i]) / TIME_CONSTANT;
            let vel = raw.clamp(-MAX_JOINT_SPEED, MAX_JOINT_SPEED);
            self.joint_vel[i] = vel;
            self.joint_pos[i] += vel * dt;
        }
        let raw = (self.gripper_target - self.gripper_pos) / TIME_CONSTANT;
        let vel = raw.clamp(-MAX_GRIPPER_SPEED, MAX_GRIPPER_SPEED);
        self.gripper_pos += vel * dt;
    }

    /// Synthetic wrist wrench: proportional to the current tracking error,
    /// which is roughly what a stiff position-servoed arm reports.
    pub fn wrench(&self) -> Wrench {
        let err = &self.joint_target - &self.joint_pos;
        let mut wrench = Wrench::zeros();
        for i in 0..err.len().min(6) {
            wrench[i] = 8.0 * err[i];
        }
        wrench
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use talos_core::prelude::ActionSource;

    fn action(targets: Vec<f64>, gripper: f64) -> Action {
        Action {
            joint_target: DVector::from_vec(targets),
            gripper_target: gripper,
            source: ActionSource::Teleop,
        }
    }

    #[test]
    fn arm_tracks_its_target() {
        let mut arm = ServoArm::home(2);
        arm.set_targets(&action(vec![0.3, -0.2], 100.0)).unwrap();
        arm.advance(2.0);
        assert_abs_diff_eq!(arm.positions()[0], 0.3, epsilon = 1e-3);
        assert_abs_diff_eq!(arm.positions()[1], -0.2, epsilon = 1e-3);
        assert_abs_diff_eq!(arm.gripper(), 100.0, epsilon = 1e-2);
    }

    #[test]
    fn out_of_range_targets_are_refused() {
        let mut arm = ServoArm::home(2);
        assert!(arm.set_targets(&action(vec![10.0, 0.0], 0.0)).is_err());
        assert!(arm.set_targets(&action(vec![0.0, 0.0], -1.0)).is_err());
        assert!(arm.set_targets(&action(vec![0.0], 0.0)).is_err());
        assert!(arm.set_targets(&action(vec![f64::NAN, 0.0], 0.0)).is_err());
    }

    #[test]
    fn velocity_stays_limited() {
        let mut arm = ServoArm::home(1);
        arm.set_targets(&action(vec![5.0], 0.0)).unwrap();
        arm.advance(0.1);
        assert!(arm.velocities()[0].abs() <= MAX_JOINT_SPEED + 1e-9);
    }

    #[test]
    fn home_pose_for_six_joints_is_elbow_up() {
        let arm = ServoArm::home(6);
        assert_abs_diff_eq!(arm.positions()[1], -FRAC_PI_2, epsilon = 1e-12);
        assert_eq!(arm.joint_count(), 6);
    }
}
