// talos_backends/src/policies/context.rs

//! Context-window runner: keeps the last `window` observations and attends
//! over them with distance-based softmax weights before the output map;
//! it has the shape of a small transformer policy at inference time.

use super::{action_from_output, check_dims, matrix_from_rows, observation_vector};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use talos_core::errors::PolicyError;
use talos_core::messages::{Action, Frame};
use talos_core::policy::{PolicyCapability, PolicyRunner};

fn default_window() -> usize {
    8
}

fn default_temperature() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWeights {
    /// How many past observations the runner attends over.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Softmax temperature for the attention scores.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// output_dim x input_dim
    pub w_out: Vec<Vec<f64>>,
}

#[derive(Debug)]
pub struct ContextRunner {
    identity: String,
    window: usize,
    temperature: f64,
    w_out: DMatrix<f64>,
    history: VecDeque<DVector<f64>>,
}

impl ContextRunner {
    pub fn from_weights(identity: String, weights: ContextWeights) -> Result<Self, PolicyError> {
        if weights.window == 0 {
            return Err(PolicyError::LoadFailed {
                identity,
                reason: "context window must be at least 1".to_string(),
            });
        }
        if !(weights.temperature.is_finite() && weights.temperature > 0.0) {
            return Err(PolicyError::LoadFailed {
                identity,
                reason: "temperature must be positive".to_string(),
            });
        }
        let w_out = matrix_from_rows(&weights.w_out, &identity)?;
        Ok(Self {
            identity,
            window: weights.window,
            temperature: weights.temperature,
            w_out,
            history: VecDeque::new(),
        })
    }

    /// Attention-weighted blend of the history, queried by the newest
    /// observation.
    fn attend(&self, query: &DVector<f64>) -> DVector<f64> {
        let scores: Vec<f64> = self
            .history
            .iter()
            .map(|x| -(query - x).norm_squared() / self.temperature)
            .collect();
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f64 = exps.iter().sum();

        let mut blended = DVector::zeros(query.len());
        for (weight, x) in exps.iter().zip(self.history.iter()) {
            blended += x * (weight / total);
        }
        blended
    }
}

impl PolicyRunner for ContextRunner {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn capability(&self) -> PolicyCapability {
        PolicyCapability::Stateful
    }

    fn reset(&mut self) {
        self.history.clear();
    }

    fn infer(&mut self, frame: &Frame) -> Result<Action, PolicyError> {
        let x = observation_vector(frame);
        check_dims(&x, self.w_out.ncols(), &self.identity)?;

        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(x.clone());

        let context = self.attend(&x);
        let y = &self.w_out * context;
        Ok(action_from_output(&y))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
