// talos_backends/src/backends/mod.rs

//! Concrete backend adapters. Each exposes the same capability set through
//! `talos_core`'s `Backend`/`BackendAdapter` traits; the scheduler never
//! branches on which one it is driving.

pub mod batched;
pub mod rigid;
mod servo;
pub mod ur5e;

pub use batched::BatchedSimBackend;
pub use rigid::RigidBodyBackend;
pub use ur5e::Ur5eBackend;

pub(crate) use servo::ServoArm;
