// talos_backends/src/backends/rigid.rs

//! Rigid-body simulation backend: the servo arm model with Gaussian sensor
//! noise and seeded per-world start variation. Plays the role the MuJoCo
//! environment plays on a workstation; it is fast, always available,
//! and deterministic under a seed.

use crate::backends::ServoArm;
use nalgebra::DVector;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use std::time::Duration;
use talos_core::adapter::{Backend, BackendAdapter, BackendSession, SessionSlot};
use talos_core::clock::SharedClock;
use talos_core::errors::AdapterError;
use talos_core::messages::{Action, CommandAck, RawState};
use talos_core::types::BackendId;
use tracing::info;

pub struct RigidBodyBackend {
    id: BackendId,
    slot: SessionSlot,
    clock: SharedClock,
    joints: usize,
    world_idx: u64,
    noise_stddev: f64,
}

impl RigidBodyBackend {
    pub fn new(clock: SharedClock, joints: usize, world_idx: u64, noise_stddev: f64) -> Self {
        Self {
            id: BackendId::from("rigid_body"),
            slot: SessionSlot::new(),
            clock,
            joints,
            world_idx,
            noise_stddev,
        }
    }
}

impl Backend for RigidBodyBackend {
    fn id(&self) -> BackendId {
        self.id.clone()
    }

    fn connect(&self) -> Result<BackendSession, AdapterError> {
        let lease = self.slot.claim()?;
        info!(world_idx = self.world_idx, joints = self.joints, "rigid-body sim connected");

        let mut rng = ChaCha8Rng::seed_from_u64(self.world_idx);
        let start_jitter = Normal::new(0.0, 0.02).expect("valid stddev");
        let mut arm = ServoArm::home(self.joints);
        let offsets =
            DVector::from_fn(self.joints, |_, _| start_jitter.sample(&mut rng));
        arm.perturb_start(&offsets);

        let adapter = RigidBodyAdapter {
            arm,
            rng,
            noise: Normal::new(0.0, self.noise_stddev.max(0.0)).unwrap_or(start_jitter),
            clock: Arc::clone(&self.clock),
            last_advance: self.clock.now(),
            connected: true,
        };
        Ok(BackendSession::new(self.id.clone(), Box::new(adapter), lease))
    }
}

struct RigidBodyAdapter {
    arm: ServoArm,
    rng: ChaCha8Rng,
    noise: Normal<f64>,
    clock: SharedClock,
    last_advance: f64,
    connected: bool,
}

impl BackendAdapter for RigidBodyAdapter {
    fn joint_count(&self) -> usize {
        self.arm.joint_count()
    }

    fn read_state(&mut self) -> Result<RawState, AdapterError> {
        if !self.connected {
            return Err(AdapterError::BackendUnavailable("simulation closed".into()));
        }
        let now = self.clock.now();
        self.arm.advance(now - self.last_advance);
        self.last_advance = now;

        // Measurement noise only; the arm's internal state stays clean.
        let mut joint_pos = self.arm.positions().clone();
        let mut joint_vel = self.arm.velocities().clone();
        let mut wrench = self.arm.wrench();
        for v in joint_pos
            .iter_mut()
            .chain(joint_vel.iter_mut())
            .chain(wrench.iter_mut())
        {
            *v += self.noise.sample(&mut self.rng);
        }

        Ok(RawState {
            timestamp: now,
            joint_pos,
            joint_vel,
            gripper_pos: self.arm.gripper(),
            wrench: Some(wrench),
        })
    }

    fn send_command(
        &mut self,
        action: &Action,
        _timeout: Duration,
    ) -> Result<CommandAck, AdapterError> {
        // The sim applies commands synchronously, so any timeout is honored.
        if !self.connected {
            return Err(AdapterError::BackendUnavailable("simulation closed".into()));
        }
        self.arm
            .set_targets(action)
            .map_err(AdapterError::CommandRejected)?;
        Ok(CommandAck {
            accepted_at: self.clock.now(),
        })
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talos_core::clock::ManualClock;
    use talos_core::messages::ActionSource;

    fn backend_on(clock: ManualClock) -> RigidBodyBackend {
        RigidBodyBackend::new(Arc::new(clock), 6, 0, 0.0)
    }

    #[test]
    fn second_connect_is_busy_until_session_drops() {
        let backend = backend_on(ManualClock::new());
        let session = backend.connect().unwrap();
        assert!(matches!(backend.connect(), Err(AdapterError::SessionBusy)));
        drop(session);
        assert!(backend.connect().is_ok());
    }

    #[test]
    fn commanded_motion_shows_up_in_state() {
        let clock = ManualClock::new();
        let backend = backend_on(clock.clone());
        let mut session = backend.connect().unwrap();

        let start = session.read_state().unwrap();
        let mut target = start.joint_pos.clone();
        target[0] += 0.3;
        session
            .send_command(
                &Action {
                    joint_target: target.clone(),
                    gripper_target: 50.0,
                    source: ActionSource::Policy,
                },
                Duration::from_millis(50),
            )
            .unwrap();

        clock.advance(1.0);
        let moved = session.read_state().unwrap();
        assert!(
            (moved.joint_pos[0] - start.joint_pos[0]).abs() > 0.1,
            "joint should have moved toward the new target"
        );
        assert!(moved.gripper_pos > 10.0);
        assert!(moved.wrench.is_some());
    }

    #[test]
    fn out_of_range_command_is_rejected() {
        let backend = backend_on(ManualClock::new());
        let mut session = backend.connect().unwrap();
        let err = session
            .send_command(
                &Action {
                    joint_target: DVector::from_element(6, 100.0),
                    gripper_target: 0.0,
                    source: ActionSource::Teleop,
                },
                Duration::from_millis(50),
            )
            .unwrap_err();
        assert!(matches!(err, AdapterError::CommandRejected(_)));
    }

    #[test]
    fn same_world_idx_reproduces_the_same_start() {
        let clock = ManualClock::new();
        let a = RigidBodyBackend::new(Arc::new(clock.clone()), 6, 7, 0.0);
        let b = RigidBodyBackend::new(Arc::new(clock), 6, 7, 0.0);
        let pos_a = a.connect().unwrap().read_state().unwrap().joint_pos;
        let pos_b = b.connect().unwrap().read_state().unwrap().joint_pos;
        assert_eq!(pos_a, pos_b);
    }
}
