// talos_backends/src/policies/recurrent.rs

//! Single-step recurrent runner: a tanh hidden state carried across ticks,
//! `h' = tanh(W_in x + W_h h + b_h)`, `y = W_out h' + b_out`.

use super::{action_from_output, check_dims, matrix_from_rows, observation_vector};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::any::Any;
use talos_core::errors::PolicyError;
use talos_core::messages::{Action, Frame};
use talos_core::policy::{PolicyCapability, PolicyRunner};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrentWeights {
    pub hidden_dim: usize,
    /// hidden_dim x input_dim
    pub w_in: Vec<Vec<f64>>,
    /// hidden_dim x hidden_dim
    pub w_h: Vec<Vec<f64>>,
    pub b_h: Vec<f64>,
    /// output_dim x hidden_dim
    pub w_out: Vec<Vec<f64>>,
    pub b_out: Vec<f64>,
}

#[derive(Debug)]
pub struct RecurrentRunner {
    identity: String,
    hidden: DVector<f64>,
    w_in: DMatrix<f64>,
    w_h: DMatrix<f64>,
    b_h: DVector<f64>,
    w_out: DMatrix<f64>,
    b_out: DVector<f64>,
}

impl RecurrentRunner {
    pub fn from_weights(identity: String, weights: RecurrentWeights) -> Result<Self, PolicyError> {
        let w_in = matrix_from_rows(&weights.w_in, &identity)?;
        let w_h = matrix_from_rows(&weights.w_h, &identity)?;
        let w_out = matrix_from_rows(&weights.w_out, &identity)?;
        let h = weights.hidden_dim;

        let consistent = w_in.nrows() == h
            && w_h.nrows() == h
            && w_h.ncols() == h
            && weights.b_h.len() == h
            && w_out.ncols() == h
            && weights.b_out.len() == w_out.nrows();
        if !consistent {
            return Err(PolicyError::LoadFailed {
                identity,
                reason: "inconsistent recurrent weight shapes".to_string(),
            });
        }

        Ok(Self {
            identity,
            hidden: DVector::zeros(h),
            w_in,
            w_h,
            b_h: DVector::from_vec(weights.b_h),
            w_out,
            b_out: DVector::from_vec(weights.b_out),
        })
    }
}

impl PolicyRunner for RecurrentRunner {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn capability(&self) -> PolicyCapability {
        PolicyCapability::Stateful
    }

    fn reset(&mut self) {
        self.hidden.fill(0.0);
    }

    fn infer(&mut self, frame: &Frame) -> Result<Action, PolicyError> {
        let x = observation_vector(frame);
        check_dims(&x, self.w_in.ncols(), &self.identity)?;

        let pre = &self.w_in * &x + &self.w_h * &self.hidden + &self.b_h;
        self.hidden = pre.map(f64::tanh);
        let y = &self.w_out * &self.hidden + &self.b_out;
        Ok(action_from_output(&y))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::frame_with;
    use super::*;

    fn runner() -> RecurrentRunner {
        RecurrentRunner::from_weights(
            "recurrent:test".to_string(),
            RecurrentWeights {
                hidden_dim: 2,
                w_in: vec![vec![0.5, 0.0, 0.0], vec![0.0, 0.5, 0.0]],
                w_h: vec![vec![0.3, 0.0], vec![0.0, 0.3]],
                b_h: vec![0.0, 0.0],
                w_out: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0]],
                b_out: vec![0.0, 0.0, 0.0],
            },
        )
        .unwrap()
    }

    #[test]
    fn hidden_state_carries_across_ticks() {
        let mut runner = runner();
        let frame = frame_with(vec![1.0, -1.0], 0.0);
        let first = runner.infer(&frame).unwrap();
        let second = runner.infer(&frame).unwrap();
        // Same observation, different hidden state, different output.
        assert_ne!(first.joint_target, second.joint_target);
    }

    #[test]
    fn reset_clears_the_hidden_state() {
        let mut runner = runner();
        let frame = frame_with(vec![1.0, -1.0], 0.0);
        let first = runner.infer(&frame).unwrap();
        runner.reset();
        let after_reset = runner.infer(&frame).unwrap();
        assert_eq!(first.joint_target, after_reset.joint_target);
    }

    #[test]
    fn wrong_observation_dims_fail() {
        let mut runner = runner();
        let frame = frame_with(vec![1.0, -1.0, 0.5], 0.0);
        assert!(matches!(
            runner.infer(&frame),
            Err(PolicyError::InferenceFailed(_))
        ));
    }

    #[test]
    fn inconsistent_shapes_fail_to_load() {
        let err = RecurrentRunner::from_weights(
            "recurrent:bad".to_string(),
            RecurrentWeights {
                hidden_dim: 3,
                w_in: vec![vec![0.5, 0.0], vec![0.0, 0.5]],
                w_h: vec![vec![0.0, 0.0], vec![0.0, 0.0]],
                b_h: vec![0.0, 0.0],
                w_out: vec![vec![1.0, 0.0]],
                b_out: vec![0.0],
            },
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::LoadFailed { .. }));
    }
}
