// talos_backends/src/setup.rs

//! Assembles a runnable rig from a scenario: the backend, the camera feeds
//! wired into the bundler, the recorder over the episode store, and the
//! control loop that owns them. The binaries stay thin on top of this.

use crate::cameras::SyntheticCamera;
use crate::scenario::Scenario;
use std::path::PathBuf;
use std::sync::Arc;
use talos_core::adapter::Backend;
use talos_core::bundler::ObservationBundler;
use talos_core::clock::{MonotonicClock, SharedClock};
use talos_core::feeds::{spawn_camera_feed, spawn_teleop_feed, FeedHandle};
use talos_core::latest::Latest;
use talos_core::messages::TeleopSample;
use talos_core::recorder::EpisodeRecorder;
use talos_core::scheduler::ControlLoop;
use talos_core::storage::EpisodeStore;
use talos_core::types::{CameraId, Stamped};
use tracing::info;

/// Everything a collection or rollout run needs, wired together.
pub struct Rig {
    pub clock: SharedClock,
    pub backend: Arc<dyn Backend>,
    pub control: ControlLoop,
    /// Running camera capture threads. Dropping stops them.
    pub camera_feeds: Vec<FeedHandle>,
}

impl Rig {
    /// Build the rig a scenario describes. `storage_override` replaces the
    /// scenario's store directory when set (the binaries' `--storage` flag).
    pub fn from_scenario(scenario: &Scenario, storage_override: Option<PathBuf>) -> Self {
        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let backend = scenario.backend.build(Arc::clone(&clock));

        let mut bundler = ObservationBundler::new(scenario.control.camera_staleness_s);
        let mut camera_feeds = Vec::with_capacity(scenario.cameras.len());
        for camera in &scenario.cameras {
            let id = CameraId::new(camera.name.clone());
            let cell = Latest::new();
            bundler.add_camera(id.clone(), cell.clone());
            camera_feeds.push(spawn_camera_feed(
                Box::new(SyntheticCamera::new(
                    id,
                    camera.width,
                    camera.height,
                    camera.latency_s,
                    camera.seed,
                    Arc::clone(&clock),
                )),
                camera.rate_hz,
                cell,
            ));
        }

        let store_dir = storage_override.unwrap_or_else(|| scenario.storage.dir.clone());
        info!(store = %store_dir.display(), backend = scenario.backend.kind_str(), "rig assembled");
        let recorder = EpisodeRecorder::new(
            EpisodeStore::new(store_dir),
            scenario.control.writer_queue_depth,
            scenario.control.retry_backoff(),
        );

        let mut control = ControlLoop::new(scenario.control.clone(), bundler, recorder);
        control.set_world_idx(scenario.backend.world_idx());

        Self {
            clock,
            backend,
            control,
            camera_feeds,
        }
    }

    /// Start the scenario's teleop device on its own polling thread and
    /// return the cell the scheduler reads from.
    pub fn spawn_teleop(&self, scenario: &Scenario) -> (Latest<Stamped<TeleopSample>>, FeedHandle) {
        let cell = Latest::new();
        let device = scenario
            .teleop
            .build(Arc::clone(&self.clock), scenario.backend.joints());
        let feed = spawn_teleop_feed(
            device,
            scenario.teleop.rate_hz(),
            Arc::clone(&self.clock),
            cell.clone(),
        );
        (cell, feed)
    }
}
