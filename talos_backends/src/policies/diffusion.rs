// talos_backends/src/policies/diffusion.rs

//! Multi-step denoising runner: starts from the held pose and iteratively
//! refines toward the conditioned target `W_cond x`. Deterministic, and
//! deliberately the slowest family per inference: each call runs the full
//! denoise schedule, which is what the scheduler's bounded wait is for.

use super::{action_from_output, check_dims, matrix_from_rows, observation_vector};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::any::Any;
use talos_core::errors::PolicyError;
use talos_core::messages::{Action, Frame};
use talos_core::policy::{PolicyCapability, PolicyRunner};

fn default_steps() -> usize {
    16
}

fn default_step_size() -> f64 {
    0.35
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffusionWeights {
    /// output_dim x input_dim conditioning map.
    pub w_cond: Vec<Vec<f64>>,
    /// Number of denoising iterations per inference.
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// Fraction of the residual removed per iteration, in (0, 1].
    #[serde(default = "default_step_size")]
    pub step_size: f64,
}

#[derive(Debug)]
pub struct DiffusionRunner {
    identity: String,
    w_cond: DMatrix<f64>,
    steps: usize,
    step_size: f64,
}

impl DiffusionRunner {
    pub fn from_weights(identity: String, weights: DiffusionWeights) -> Result<Self, PolicyError> {
        if weights.steps == 0 {
            return Err(PolicyError::LoadFailed {
                identity,
                reason: "denoise schedule needs at least one step".to_string(),
            });
        }
        if !(weights.step_size > 0.0 && weights.step_size <= 1.0) {
            return Err(PolicyError::LoadFailed {
                identity,
                reason: "step_size must be in (0, 1]".to_string(),
            });
        }
        let w_cond = matrix_from_rows(&weights.w_cond, &identity)?;
        Ok(Self {
            identity,
            w_cond,
            steps: weights.steps,
            step_size: weights.step_size,
        })
    }
}

impl PolicyRunner for DiffusionRunner {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn capability(&self) -> PolicyCapability {
        PolicyCapability::Stateless
    }

    fn reset(&mut self) {}

    fn infer(&mut self, frame: &Frame) -> Result<Action, PolicyError> {
        let x = observation_vector(frame);
        check_dims(&x, self.w_cond.ncols(), &self.identity)?;

        let target = &self.w_cond * &x;
        // Denoise from the held pose toward the conditioned target.
        let mut sample = if target.len() == x.len() {
            x.clone()
        } else {
            nalgebra::DVector::zeros(target.len())
        };
        for _ in 0..self.steps {
            sample += (&target - &sample) * self.step_size;
        }
        Ok(action_from_output(&sample))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
