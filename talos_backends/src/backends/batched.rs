// talos_backends/src/backends/batched.rs

//! GPU-batched simulation backend, modelled down to what the loop needs:
//! N identical environments stepped together, commands broadcast to every
//! environment, and the last environment acting as the representative whose
//! state the adapter reports.

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

pub struct BatchedSimBackend {
    id: BackendId,
    slot: SessionSlot,
    clock: SharedClock,
    joints: usize,
    num_envs: usize,
    world_idx: u64,
}

impl BatchedSimBackend {
    pub fn new(clock: SharedClock, joints: usize, num_envs: usize, world_idx: u64) -> Self {
        Self {
            id: BackendId::from("batched_sim"),
            slot: SessionSlot::new(),
            clock,
            joints,
            num_envs: num_envs.max(1),
            world_idx,
        }
    }
}

impl Backend for BatchedSimBackend {
    fn id(&self) -> BackendId {
        self.id.clone()
    }

    fn connect(&self) -> Result<BackendSession, AdapterError> {
        let lease = self.slot.claim()?;
        info!(
            num_envs = self.num_envs,
            world_idx = self.world_idx,
            "batched sim connected"
        );

        let mut rng = ChaCha8Rng::seed_from_u64(self.world_idx);
        let start_jitter = Normal::new(0.0, 0.02).expect("valid stddev");
        let envs = (0..self.num_envs)
            .map(|_| {
                let mut arm = ServoArm::home(self.joints);
                let offsets =
                    DVector::from_fn(self.joints, |_, _| start_jitter.sample(&mut rng));
                arm.perturb_start(&offsets);
                arm
            })
            .collect::<Vec<_>>();

        let adapter = BatchedAdapter {
            // The last environment is the representative one.
            rep: envs.len() - 1,
            envs,
            clock: Arc::clone(&self.clock),
            last_advance: self.clock.now(),
            connected: true,
        };
        Ok(BackendSession::new(self.id.clone(), Box::new(adapter), lease))
    }
}

struct BatchedAdapter {
    envs: Vec<ServoArm>,
    rep: usize,
    clock: SharedClock,
    last_advance: f64,
    connected: bool,
}

impl BackendAdapter for BatchedAdapter {
    fn joint_count(&self) -> usize {
        self.envs[self.rep].joint_count()
    }

    fn read_state(&mut self) -> Result<RawState, AdapterError> {
        if !self.connected {
            return Err(AdapterError::BackendUnavailable("simulation closed".into()));
        }
        let now = self.clock.now();
        let elapsed = now - self.last_advance;
        self.last_advance = now;
        for env in &mut self.envs {
            env.advance(elapsed);
        }

        let rep = &self.envs[self.rep];
        Ok(RawState {
            timestamp: now,
            joint_pos: rep.positions().clone(),
            joint_vel: rep.velocities().clone(),
            gripper_pos: rep.gripper(),
            wrench: Some(rep.wrench()),
        })
    }

    fn send_command(
        &mut self,
        action: &Action,
        _timeout: Duration,
    ) -> Result<CommandAck, AdapterError> {
        if !self.connected {
            return Err(AdapterError::BackendUnavailable("simulation closed".into()));
        }
        // Validate once against the representative env, then broadcast.
        self.envs[self.rep]
            .set_targets(action)
            .map_err(AdapterError::CommandRejected)?;
        let rep = self.rep;
        for (i, env) in self.envs.iter_mut().enumerate() {
            if i != rep {
                // Same validation already passed; a per-env failure here
                // would mean diverged env state, which this model cannot do.
                let _ = env.set_targets(action);
            }
        }
        Ok(CommandAck {
            accepted_at: self.clock.now(),
        })
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}
