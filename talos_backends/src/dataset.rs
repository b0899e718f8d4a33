// talos_backends/src/dataset.rs

//! Dataset assembly over the episode store: scan, validate, split into
//! train/test sets by filename keyword, and compute per-modality min/max
//! bounds for normalization on the training side.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use talos_core::episode::{Episode, EpisodeOutcome};
use talos_core::errors::StorageError;
use talos_core::storage::{EpisodeStore, TMP_SUFFIX};
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub path: PathBuf,
    pub stem: String,
    pub frames: usize,
    pub outcome: EpisodeOutcome,
    pub backend: String,
    pub world_idx: Option<u64>,
}

/// Per-dimension min/max over a modality, the normalization bounds the
/// training pipelines expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityBounds {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl ModalityBounds {
    fn new(dim: usize) -> Self {
        Self {
            min: vec![f64::INFINITY; dim],
            max: vec![f64::NEG_INFINITY; dim],
        }
    }

    fn update(&mut self, values: impl Iterator<Item = f64>) {
        for (i, v) in values.enumerate() {
            if i >= self.min.len() {
                break;
            }
            self.min[i] = self.min[i].min(v);
            self.max[i] = self.max[i].max(v);
        }
    }

    fn is_populated(&self) -> bool {
        self.min.iter().all(|v| v.is_finite())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetIndex {
    /// Stride applied over frames when computing bounds.
    pub frame_skip: usize,
    pub train: Vec<DatasetEntry>,
    pub test: Vec<DatasetEntry>,
    pub joint_bounds: Option<ModalityBounds>,
    pub wrench_bounds: Option<ModalityBounds>,
}

/// Read every valid episode under `root`, sorted by file name. Malformed
/// files are logged and skipped; in-flight temp files are ignored.
pub fn scan(root: &Path) -> Vec<(PathBuf, Episode)> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension().map(|e| e == "json").unwrap_or(false)
                && !path
                    .to_string_lossy()
                    .ends_with(&format!(".{TMP_SUFFIX}"))
        })
        .collect();
    paths.sort();

    let mut episodes = Vec::with_capacity(paths.len());
    for path in paths {
        match EpisodeStore::read_file(&path) {
            Ok(episode) => episodes.push((path, episode)),
            Err(e) => warn!(error = %e, "skipping unreadable episode"),
        }
    }
    episodes
}

/// Split episode indices into train/test sets by filename keyword.
///
/// With no train keywords, every episode except the middle one trains and
/// the middle one tests, the sensible default when all demonstrations come
/// from one session. Explicit keywords select by substring match.
pub fn split_indices(
    stems: &[String],
    train_keywords: &[String],
    test_keywords: &[String],
) -> (Vec<usize>, Vec<usize>) {
    let effective_train: Vec<String> = if train_keywords.is_empty() {
        let pivot = stems.len().saturating_sub(1) / 2;
        stems
            .iter()
            .enumerate()
            .filter(|(i, _)| stems.len() < 2 || *i != pivot)
            .map(|(_, s)| s.clone())
            .collect()
    } else {
        train_keywords.to_vec()
    };

    let effective_test: Vec<String> = if test_keywords.is_empty() {
        // Everything no train keyword matches.
        stems
            .iter()
            .filter(|stem| !effective_train.iter().any(|kw| stem.contains(kw.as_str())))
            .cloned()
            .collect()
    } else {
        test_keywords.to_vec()
    };

    let matches = |stem: &str, keywords: &[String]| {
        keywords.iter().any(|kw| stem.contains(kw.as_str()))
    };
    let train = stems
        .iter()
        .enumerate()
        .filter(|(_, stem)| matches(stem, &effective_train))
        .map(|(i, _)| i)
        .collect();
    let test = stems
        .iter()
        .enumerate()
        .filter(|(_, stem)| matches(stem, &effective_test))
        .map(|(i, _)| i)
        .collect();
    (train, test)
}

/// Build the dataset index over the store at `root`.
pub fn build_index(
    root: &Path,
    train_keywords: &[String],
    test_keywords: &[String],
    frame_skip: usize,
) -> DatasetIndex {
    let frame_skip = frame_skip.max(1);
    let episodes = scan(root);
    let stems: Vec<String> = episodes
        .iter()
        .map(|(path, _)| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();
    let (train_idx, test_idx) = split_indices(&stems, train_keywords, test_keywords);

    let entry_for = |i: usize| {
        let (path, episode) = &episodes[i];
        DatasetEntry {
            path: path.clone(),
            stem: stems[i].clone(),
            frames: episode.len(),
            outcome: episode.meta.outcome,
            backend: episode.meta.backend.to_string(),
            world_idx: episode.meta.world_idx,
        }
    };
    let train: Vec<DatasetEntry> = train_idx.iter().map(|&i| entry_for(i)).collect();
    let test: Vec<DatasetEntry> = test_idx.iter().map(|&i| entry_for(i)).collect();

    // Bounds come from the training set only.
    let mut joint_bounds: Option<ModalityBounds> = None;
    let mut wrench_bounds: Option<ModalityBounds> = None;
    for &i in &train_idx {
        let (_, episode) = &episodes[i];
        for step in episode.steps.iter().step_by(frame_skip) {
            let positions = &step.frame.joints.positions;
            joint_bounds
                .get_or_insert_with(|| ModalityBounds::new(positions.len()))
                .update(positions.iter().copied());
            if let Some(wrench) = &step.frame.wrench {
                wrench_bounds
                    .get_or_insert_with(|| ModalityBounds::new(6))
                    .update(wrench.iter().copied());
            }
        }
    }
    let joint_bounds = joint_bounds.filter(ModalityBounds::is_populated);
    let wrench_bounds = wrench_bounds.filter(ModalityBounds::is_populated);

    info!(
        episodes = episodes.len(),
        train = train.len(),
        test = test.len(),
        "dataset index built"
    );
    DatasetIndex {
        frame_skip,
        train,
        test,
        joint_bounds,
        wrench_bounds,
    }
}

/// Write the index as `index.json` under `out_dir`.
pub fn write_index(index: &DatasetIndex, out_dir: &Path) -> Result<PathBuf, StorageError> {
    std::fs::create_dir_all(out_dir).map_err(|source| StorageError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let path = out_dir.join("index.json");
    let json = serde_json::to_vec_pretty(index).map_err(|e| StorageError::Malformed {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    std::fs::write(&path, json).map_err(|source| StorageError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use talos_core::episode::EpisodeBuilder;
    use talos_core::messages::{Action, ActionSource, Frame, JointState};
    use talos_core::types::{BackendId, JointVector, Wrench};

    fn write_episode(store: &EpisodeStore, seq: u64, positions: &[Vec<f64>]) -> PathBuf {
        let mut builder = EpisodeBuilder::new(BackendId::from("ds_test"), None, 0.1, Some(seq));
        for (i, pos) in positions.iter().enumerate() {
            let frame = Frame {
                timestamp: i as f64 * 0.1,
                joints: JointState {
                    positions: JointVector::from_vec(pos.clone()),
                    velocities: JointVector::zeros(pos.len()),
                },
                gripper_pos: 0.0,
                cameras: BTreeMap::new(),
                wrench: Some(Wrench::from_element(seq as f64)),
                stale_vision: false,
            };
            let action = Action::hold_position(&frame, ActionSource::Teleop);
            builder.append(frame, action);
        }
        let episode = builder.finish(EpisodeOutcome::Success, 0, seq);
        store.write(&episode, seq).unwrap()
    }

    #[test]
    fn default_split_excludes_the_middle_episode() {
        let stems = vec![
            "ep_000".to_string(),
            "ep_001".to_string(),
            "ep_002".to_string(),
        ];
        let (train, test) = split_indices(&stems, &[], &[]);
        assert_eq!(train, vec![0, 2]);
        assert_eq!(test, vec![1]);
    }

    #[test]
    fn explicit_keywords_select_by_substring() {
        let stems = vec![
            "pick_000".to_string(),
            "pick_001".to_string(),
            "place_000".to_string(),
        ];
        let (train, test) =
            split_indices(&stems, &["pick".to_string()], &["place".to_string()]);
        assert_eq!(train, vec![0, 1]);
        assert_eq!(test, vec![2]);
    }

    #[test]
    fn index_covers_the_store_and_computes_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::new(dir.path());
        write_episode(&store, 0, &[vec![0.0, 1.0], vec![0.5, -1.0]]);
        write_episode(&store, 1, &[vec![2.0, 0.0]]);
        write_episode(&store, 2, &[vec![-3.0, 4.0]]);

        let index = build_index(dir.path(), &[], &[], 1);
        assert_eq!(index.train.len() + index.test.len(), 3);
        assert_eq!(index.test.len(), 1);

        let bounds = index.joint_bounds.as_ref().unwrap();
        assert_eq!(bounds.min.len(), 2);
        // Bounds cover only the two training episodes.
        assert!(bounds.min[0] <= -3.0 || bounds.min[0] <= 0.0);
        assert!(index.wrench_bounds.is_some());

        let out = write_index(&index, dir.path()).unwrap();
        assert!(out.ends_with("index.json"));
    }

    #[test]
    fn malformed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::new(dir.path());
        write_episode(&store, 0, &[vec![0.0]]);
        std::fs::write(dir.path().join("junk.json"), b"not an episode").unwrap();

        let episodes = scan(dir.path());
        assert_eq!(episodes.len(), 1);
    }
}
