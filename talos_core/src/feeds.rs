// talos_core/src/feeds.rs

//! Concurrent producers for the observation side of the loop: camera capture
//! and human-input polling each run on their own thread at the source's
//! native rate, publishing into a [`Latest`] cell. The control loop only
//! ever reads the newest sample, so a slow source shows up as staleness,
//! never as backlog or a stalled tick.

use crate::clock::SharedClock;
use crate::errors::FeedError;
use crate::latest::Latest;
use crate::messages::{CameraFrame, TeleopSample};
use crate::types::{CameraId, Stamped};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

// --- CAMERA SOURCE TRAIT ---
/// Pull-based "latest frame" interface over a camera driver. The core does
/// not manage driver lifecycles beyond the feed thread's start/stop; vendor
/// drivers sit behind this trait.
pub trait CameraSource: Send {
    fn camera_id(&self) -> CameraId;

    /// Capture one frame, stamped by the source on the run's clock.
    fn grab(&mut self) -> Result<CameraFrame, FeedError>;
}

// --- TELEOP DEVICE TRAIT ---
/// A human input device producing pose/gripper deltas at its own rate.
pub trait TeleopDevice: Send {
    /// Read the device's current sample.
    fn poll(&mut self) -> Result<TeleopSample, FeedError>;
}

/// Handle to a running feed thread. Stopping is a one-way signal observed at
/// the top of the feed's poll cycle; dropping the handle stops and joins.
pub struct FeedHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl FeedHandle {
    pub fn stop(mut self) {
        self.shut_down();
    }

    fn shut_down(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.shut_down();
    }
}

/// Spawn a capture thread that polls `source` at `rate_hz` into `cell`.
/// Capture errors are logged and retried; persistent ones surface through
/// the bundler's staleness flag instead of stalling anything.
pub fn spawn_camera_feed(
    mut source: Box<dyn CameraSource>,
    rate_hz: f64,
    cell: Latest<CameraFrame>,
) -> FeedHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let period = period_from_rate(rate_hz);
    let camera = source.camera_id();
    let thread_name = format!("camera-{camera}");

    let join = thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                match source.grab() {
                    Ok(frame) => cell.publish(frame),
                    Err(e) => warn!(camera = %camera, error = %e, "camera grab failed"),
                }
                thread::sleep(period);
            }
        })
        .expect("spawn camera feed thread");

    FeedHandle {
        stop,
        join: Some(join),
    }
}

/// Spawn a polling thread that samples `device` at `rate_hz` into `cell`,
/// stamping each sample on the run's clock.
pub fn spawn_teleop_feed(
    mut device: Box<dyn TeleopDevice>,
    rate_hz: f64,
    clock: SharedClock,
    cell: Latest<Stamped<TeleopSample>>,
) -> FeedHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let period = period_from_rate(rate_hz);

    let join = thread::Builder::new()
        .name("teleop-input".to_string())
        .spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                match device.poll() {
                    Ok(sample) => cell.publish(Stamped::new(sample, clock.now())),
                    Err(e) => warn!(error = %e, "teleop poll failed"),
                }
                thread::sleep(period);
            }
        })
        .expect("spawn teleop feed thread");

    FeedHandle {
        stop,
        join: Some(join),
    }
}

fn period_from_rate(rate_hz: f64) -> Duration {
    if rate_hz > 0.0 {
        Duration::from_secs_f64(1.0 / rate_hz)
    } else {
        // A non-positive rate degenerates to a slow idle poll.
        Duration::from_millis(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::messages::CameraImage;

    struct CountingCamera {
        id: CameraId,
        grabs: u32,
    }

    impl CameraSource for CountingCamera {
        fn camera_id(&self) -> CameraId {
            self.id.clone()
        }

        fn grab(&mut self) -> Result<CameraFrame, FeedError> {
            self.grabs += 1;
            Ok(CameraFrame {
                image: CameraImage {
                    width: 1,
                    height: 1,
                    pixels: vec![self.grabs as u8, 0, 0],
                },
                captured_at: f64::from(self.grabs),
            })
        }
    }

    struct ZeroDevice;

    impl TeleopDevice for ZeroDevice {
        fn poll(&mut self) -> Result<TeleopSample, FeedError> {
            Ok(TeleopSample::zero(2))
        }
    }

    #[test]
    fn camera_feed_publishes_newest_frame() {
        let cell = Latest::new();
        let feed = spawn_camera_feed(
            Box::new(CountingCamera {
                id: CameraId::from("front"),
                grabs: 0,
            }),
            500.0,
            cell.clone(),
        );
        // Wait until at least two frames have been replaced in the slot.
        let mut seen = None;
        for _ in 0..100 {
            if let Some(frame) = cell.peek() {
                if frame.captured_at >= 2.0 {
                    seen = Some(frame);
                    break;
                }
            }
            thread::sleep(Duration::from_millis(2));
        }
        feed.stop();
        let frame = seen.expect("feed produced frames");
        assert!(frame.captured_at >= 2.0);
    }

    #[test]
    fn teleop_feed_stamps_on_run_clock() {
        let clock = ManualClock::starting_at(42.0);
        let cell = Latest::new();
        let feed = spawn_teleop_feed(
            Box::new(ZeroDevice),
            500.0,
            Arc::new(clock.clone()),
            cell.clone(),
        );
        let mut stamped = None;
        for _ in 0..100 {
            if let Some(s) = cell.peek() {
                stamped = Some(s);
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        feed.stop();
        assert_eq!(stamped.expect("feed produced samples").timestamp, 42.0);
    }
}
