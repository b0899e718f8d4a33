// talos_backends/src/lib.rs

//! Application layer over `talos_core`: concrete backends (rigid-body sim,
//! batched sim, UR5e bridge), synthetic cameras, teleop devices, policy
//! runners, scenario configuration, and dataset assembly. The `collect`,
//! `rollout`, and `dataset` binaries are thin shells over these modules.

pub mod backends;
pub mod cameras;
pub mod cli;
pub mod dataset;
pub mod policies;
pub mod scenario;
pub mod setup;
pub mod teleop;
