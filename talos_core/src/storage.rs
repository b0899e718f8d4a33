// talos_core/src/storage.rs

//! On-disk episode store. One JSON document per episode, written atomically
//! (temp file + rename) so training pipelines reading the directory never
//! observe a half-written episode as valid. This schema is the sole
//! interface to training code; the core never depends on training internals.

use crate::episode::{Episode, EPISODE_SCHEMA_VERSION};
use crate::errors::StorageError;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Suffix used while an episode is being written; readers must skip these.
pub const TMP_SUFFIX: &str = "tmp";

pub struct EpisodeStore {
    root: PathBuf,
}

impl EpisodeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path for an episode: `<backend>_<created_ms>_<seq>.json`.
    pub fn episode_path(&self, episode: &Episode, seq: u64) -> PathBuf {
        self.root.join(format!(
            "{}_{}_{:04}.json",
            episode.meta.backend, episode.meta.created_unix_ms, seq
        ))
    }

    /// Persist one episode. The document only becomes visible under its
    /// final name once it is fully on disk.
    pub fn write(&self, episode: &Episode, seq: u64) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(&self.root).map_err(|source| StorageError::Io {
            path: self.root.clone(),
            source,
        })?;

        let path = self.episode_path(episode, seq);
        let tmp = path.with_extension(TMP_SUFFIX);

        let file = File::create(&tmp).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, episode).map_err(|e| StorageError::Malformed {
            path: tmp.clone(),
            reason: e.to_string(),
        })?;
        writer.flush().map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        writer
            .into_inner()
            .map_err(|e| StorageError::Io {
                path: tmp.clone(),
                source: e.into_error(),
            })?
            .sync_all()
            .map_err(|source| StorageError::Io {
                path: tmp.clone(),
                source,
            })?;

        fs::rename(&tmp, &path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Read and validate one episode file. Replaying the same file through
    /// this reader always yields identical data.
    pub fn read_file(path: &Path) -> Result<Episode, StorageError> {
        let file = File::open(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let episode: Episode =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| StorageError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if episode.meta.schema_version != EPISODE_SCHEMA_VERSION {
            return Err(StorageError::Malformed {
                path: path.to_path_buf(),
                reason: format!(
                    "schema version {} (expected {})",
                    episode.meta.schema_version, EPISODE_SCHEMA_VERSION
                ),
            });
        }
        if episode.meta.frame_count != episode.steps.len() {
            return Err(StorageError::Malformed {
                path: path.to_path_buf(),
                reason: format!(
                    "frame_count {} does not match {} recorded steps",
                    episode.meta.frame_count,
                    episode.steps.len()
                ),
            });
        }
        Ok(episode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{EpisodeBuilder, EpisodeOutcome};
    use crate::messages::{Action, ActionSource, CameraImage, CameraSample, Frame, JointState};
    use crate::types::{BackendId, CameraId, JointVector, Wrench};
    use std::collections::BTreeMap;

    fn sample_episode() -> Episode {
        let mut builder =
            EpisodeBuilder::new(BackendId::from("store_test"), Some("ctx:demo".into()), 0.04, None);
        for i in 0..3 {
            let t = 0.04 * i as f64;
            let mut cameras = BTreeMap::new();
            cameras.insert(
                CameraId::from("front"),
                CameraSample {
                    image: CameraImage {
                        width: 2,
                        height: 2,
                        pixels: vec![i as u8; 12],
                    },
                    captured_at: t - 0.01,
                    latency: 0.01,
                },
            );
            let frame = Frame {
                timestamp: t,
                joints: JointState {
                    positions: JointVector::from_vec(vec![0.1 * i as f64, -0.2]),
                    velocities: JointVector::from_vec(vec![0.0, 0.3]),
                },
                gripper_pos: 0.5,
                cameras,
                wrench: Some(Wrench::new(0.1, 0.2, 0.3, 0.0, 0.0, -0.1)),
                stale_vision: i == 2,
            };
            let action = Action {
                joint_target: JointVector::from_vec(vec![0.1 * i as f64 + 0.01, -0.2]),
                gripper_target: 0.6,
                source: ActionSource::Policy,
            };
            builder.append(frame, action);
        }
        builder.finish(EpisodeOutcome::Success, 0, 99)
    }

    #[test]
    fn round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::new(dir.path());
        let episode = sample_episode();

        let path = store.write(&episode, 0).unwrap();
        let first = EpisodeStore::read_file(&path).unwrap();
        let second = EpisodeStore::read_file(&path).unwrap();

        assert_eq!(episode, first);
        assert_eq!(first, second);
    }

    #[test]
    fn no_temp_file_remains_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::new(dir.path());
        store.write(&sample_episode(), 1).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == TMP_SUFFIX)
                    .unwrap_or(false)
            })
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn frame_count_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::new(dir.path());
        let mut episode = sample_episode();
        episode.meta.frame_count = 7;

        let path = store.write(&episode, 2).unwrap();
        let err = EpisodeStore::read_file(&path).unwrap_err();
        assert!(matches!(err, StorageError::Malformed { .. }));
    }

    #[test]
    fn garbage_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{ not json").unwrap();
        let err = EpisodeStore::read_file(&path).unwrap_err();
        assert!(matches!(err, StorageError::Malformed { .. }));
    }
}
