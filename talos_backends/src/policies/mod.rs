// talos_backends/src/policies/mod.rs

//! Policy runners. Each family wraps its arithmetic behind `talos_core`'s
//! `PolicyRunner` contract: the scheduler only ever sees
//! `infer(observation) -> action` plus the stateless/stateful capability
//! tag, so its timeout and latency handling is identical for all of them.
//!
//! Weights are plain JSON documents produced by the training side; `load`
//! is the single entry point that picks the family and reads them.

mod context;
mod diffusion;
mod recurrent;

pub use context::{ContextRunner, ContextWeights};
pub use diffusion::{DiffusionRunner, DiffusionWeights};
pub use recurrent::{RecurrentRunner, RecurrentWeights};

use nalgebra::{DMatrix, DVector};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::any::Any;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use talos_core::errors::PolicyError;
use talos_core::messages::{Action, ActionSource, Frame};
use talos_core::policy::{PolicyCapability, PolicyRunner};

/// Which runner to build, straight out of the scenario file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "family")]
#[serde(rename_all = "PascalCase")]
pub enum PolicySpec {
    /// No learning involved: hold the observed pose. Handy for smoke
    /// rollouts of a new backend.
    Hold,
    Recurrent {
        weights: PathBuf,
    },
    Context {
        weights: PathBuf,
    },
    Diffusion {
        weights: PathBuf,
    },
}

impl PolicySpec {
    pub fn family_str(&self) -> &str {
        match self {
            PolicySpec::Hold => "Hold",
            PolicySpec::Recurrent { .. } => "Recurrent",
            PolicySpec::Context { .. } => "Context",
            PolicySpec::Diffusion { .. } => "Diffusion",
        }
    }
}

/// Build the runner a spec names, reading its weight file.
pub fn load(spec: &PolicySpec) -> Result<Box<dyn PolicyRunner>, PolicyError> {
    match spec {
        PolicySpec::Hold => Ok(Box::new(HoldRunner)),
        PolicySpec::Recurrent { weights } => {
            let parsed: RecurrentWeights = read_weights(weights)?;
            Ok(Box::new(RecurrentRunner::from_weights(
                identity_for("recurrent", weights),
                parsed,
            )?))
        }
        PolicySpec::Context { weights } => {
            let parsed: ContextWeights = read_weights(weights)?;
            Ok(Box::new(ContextRunner::from_weights(
                identity_for("context", weights),
                parsed,
            )?))
        }
        PolicySpec::Diffusion { weights } => {
            let parsed: DiffusionWeights = read_weights(weights)?;
            Ok(Box::new(DiffusionRunner::from_weights(
                identity_for("diffusion", weights),
                parsed,
            )?))
        }
    }
}

fn identity_for(family: &str, weights: &Path) -> String {
    let stem = weights
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    format!("{family}:{stem}")
}

fn read_weights<T: DeserializeOwned>(path: &Path) -> Result<T, PolicyError> {
    let file = File::open(path).map_err(|e| PolicyError::LoadFailed {
        identity: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| PolicyError::LoadFailed {
        identity: path.display().to_string(),
        reason: e.to_string(),
    })
}

// =========================================================================
// == Shared Numeric Helpers ==
// =========================================================================

/// The observation vector every family consumes: joint positions plus the
/// gripper position, in that order.
pub(crate) fn observation_vector(frame: &Frame) -> DVector<f64> {
    let n = frame.joints.positions.len();
    DVector::from_fn(n + 1, |i, _| {
        if i < n {
            frame.joints.positions[i]
        } else {
            frame.gripper_pos
        }
    })
}

/// The action layout every family produces: joint targets plus the gripper
/// target, in that order.
pub(crate) fn action_from_output(output: &DVector<f64>) -> Action {
    let n = output.len().saturating_sub(1);
    Action {
        joint_target: DVector::from_fn(n, |i, _| output[i]),
        gripper_target: if output.len() > n { output[n] } else { 0.0 },
        source: ActionSource::Policy,
    }
}

pub(crate) fn matrix_from_rows(
    rows: &[Vec<f64>],
    what: &str,
) -> Result<DMatrix<f64>, PolicyError> {
    let nrows = rows.len();
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    if nrows == 0 || ncols == 0 {
        return Err(PolicyError::LoadFailed {
            identity: what.to_string(),
            reason: "empty weight matrix".to_string(),
        });
    }
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(PolicyError::LoadFailed {
            identity: what.to_string(),
            reason: "ragged weight matrix".to_string(),
        });
    }
    Ok(DMatrix::from_fn(nrows, ncols, |r, c| rows[r][c]))
}

pub(crate) fn check_dims(
    x: &DVector<f64>,
    expected: usize,
    identity: &str,
) -> Result<(), PolicyError> {
    if x.len() != expected {
        return Err(PolicyError::InferenceFailed(format!(
            "{identity}: observation has {} dims, weights expect {expected}",
            x.len()
        )));
    }
    Ok(())
}

// =========================================================================
// == Hold Runner ==
// =========================================================================

/// Stateless runner that targets whatever pose it observes.
#[derive(Debug)]
pub struct HoldRunner;

impl PolicyRunner for HoldRunner {
    fn identity(&self) -> &str {
        "hold"
    }

    fn capability(&self) -> PolicyCapability {
        PolicyCapability::Stateless
    }

    fn reset(&mut self) {}

    fn infer(&mut self, frame: &Frame) -> Result<Action, PolicyError> {
        Ok(Action::hold_position(frame, ActionSource::Policy))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::BTreeMap;
    use talos_core::messages::JointState;
    use talos_core::types::JointVector;

    pub fn frame_with(positions: Vec<f64>, gripper: f64) -> Frame {
        let n = positions.len();
        Frame {
            timestamp: 0.0,
            joints: JointState {
                positions: JointVector::from_vec(positions),
                velocities: JointVector::zeros(n),
            },
            gripper_pos: gripper,
            cameras: BTreeMap::new(),
            wrench: None,
            stale_vision: false,
        }
    }

    /// An identity mapping: action = observation.
    pub fn identity_rows(dim: usize) -> Vec<Vec<f64>> {
        (0..dim)
            .map(|r| (0..dim).map(|c| if r == c { 1.0 } else { 0.0 }).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::frame_with;
    use super::*;

    #[test]
    fn hold_runner_echoes_the_observed_pose() {
        let mut runner = HoldRunner;
        let frame = frame_with(vec![0.1, 0.2, 0.3], 40.0);
        let action = runner.infer(&frame).unwrap();
        assert_eq!(action.joint_target, frame.joints.positions);
        assert_eq!(action.gripper_target, 40.0);
        assert_eq!(action.source, ActionSource::Policy);
    }

    #[test]
    fn loader_reads_weights_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny_recurrent.json");
        let weights = serde_json::json!({
            "hidden_dim": 2,
            "w_in": [[0.1, 0.0, 0.0], [0.0, 0.1, 0.0]],
            "w_h": [[0.0, 0.0], [0.0, 0.0]],
            "b_h": [0.0, 0.0],
            "w_out": [[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]],
            "b_out": [0.0, 0.0, 10.0]
        });
        std::fs::write(&path, serde_json::to_string(&weights).unwrap()).unwrap();

        let mut runner = load(&PolicySpec::Recurrent {
            weights: path.clone(),
        })
        .unwrap();
        assert_eq!(runner.identity(), "recurrent:tiny_recurrent");
        assert_eq!(runner.capability(), PolicyCapability::Stateful);

        let action = runner.infer(&frame_with(vec![1.0, 2.0], 0.0)).unwrap();
        assert_eq!(action.joint_target.len(), 2);
        assert!((action.gripper_target - 10.0).abs() < 1e-9);
    }

    #[test]
    fn missing_weight_file_fails_to_load() {
        let err = load(&PolicySpec::Diffusion {
            weights: PathBuf::from("/nonexistent/weights.json"),
        })
        .unwrap_err();
        assert!(matches!(err, PolicyError::LoadFailed { .. }));
    }
}
