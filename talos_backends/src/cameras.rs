// talos_backends/src/cameras.rs

//! Synthetic camera sources. Vendor camera drivers live outside the core;
//! these produce deterministic RGB patterns at a configured size so the
//! simulated backends (and tests) exercise the full vision path (capture
//! thread, latest-value cell, staleness accounting) with real image bytes.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use talos_core::clock::SharedClock;
use talos_core::errors::FeedError;
use talos_core::feeds::CameraSource;
use talos_core::messages::{CameraFrame, CameraImage};
use talos_core::types::CameraId;

pub struct SyntheticCamera {
    id: CameraId,
    width: u32,
    height: u32,
    /// Simulated capture latency: frames are stamped this far in the past.
    latency: f64,
    clock: SharedClock,
    rng: ChaCha8Rng,
    seq: u64,
}

impl SyntheticCamera {
    pub fn new(
        id: CameraId,
        width: u32,
        height: u32,
        latency: f64,
        seed: u64,
        clock: SharedClock,
    ) -> Self {
        Self {
            id,
            width,
            height,
            latency: latency.max(0.0),
            clock,
            rng: ChaCha8Rng::seed_from_u64(seed),
            seq: 0,
        }
    }

    fn render(&mut self) -> CameraImage {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = Vec::with_capacity(w * h * 3);
        // A moving stripe over a static gradient, so successive frames
        // differ and compression-free diffing in tests is trivial.
        let stripe = (self.seq as usize) % w.max(1);
        for y in 0..h {
            for x in 0..w {
                let r = ((x * 255) / w.max(1)) as u8;
                let g = ((y * 255) / h.max(1)) as u8;
                let b = if x == stripe {
                    255
                } else {
                    self.rng.gen_range(0..16)
                };
                pixels.extend_from_slice(&[r, g, b]);
            }
        }
        CameraImage {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

impl CameraSource for SyntheticCamera {
    fn camera_id(&self) -> CameraId {
        self.id.clone()
    }

    fn grab(&mut self) -> Result<CameraFrame, FeedError> {
        self.seq += 1;
        let image = self.render();
        Ok(CameraFrame {
            image,
            captured_at: (self.clock.now() - self.latency).max(0.0),
        })
    }
}
