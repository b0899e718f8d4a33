// talos_core/src/adapter.rs

use crate::errors::AdapterError;
use crate::messages::{Action, CommandAck, RawState};
use crate::types::BackendId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- BACKEND ADAPTER TRAIT ---
/// The uniform capability set every backend implements: simulated rigid-body
/// physics, GPU-batched simulation, or a real arm over a network link.
/// Callers never branch on backend identity; the scheduler drives every
/// backend through exactly this contract.
pub trait BackendAdapter: Send {
    /// Number of controllable arm joints (the gripper is separate).
    fn joint_count(&self) -> usize;

    /// Sample the backend's current state.
    ///
    /// # Errors
    /// `BackendUnavailable` if the underlying link has dropped.
    fn read_state(&mut self) -> Result<RawState, AdapterError>;

    /// Issue one command. May cause physical or simulated motion.
    ///
    /// Implementations must return within `timeout`: `CommandTimeout` is the
    /// correct answer when the backend does not acknowledge in time, never a
    /// blocked control loop. `CommandRejected` reports an out-of-range or
    /// unsafe target.
    fn send_command(&mut self, action: &Action, timeout: Duration)
        -> Result<CommandAck, AdapterError>;

    /// Release hardware/simulator resources. Idempotent; called again on
    /// session drop.
    fn disconnect(&mut self);
}

// --- BACKEND FACTORY TRAIT ---
/// A configured backend that can be connected. Connecting yields the session
/// that owns the adapter's resources for its lifetime.
pub trait Backend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Open a session against this backend.
    ///
    /// # Errors
    /// `SessionBusy` if a session is already held: exactly one control loop
    /// may drive a backend at a time. `BackendUnavailable` if the link
    /// cannot be established.
    fn connect(&self) -> Result<BackendSession, AdapterError>;
}

// =========================================================================
// == Session Ownership ==
// =========================================================================

/// Tracks whether a session is currently held for one backend instance.
/// Backends embed one of these and claim it in `connect`.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot(Arc<AtomicBool>);

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot, failing with `SessionBusy` if it is already held.
    pub fn claim(&self) -> Result<SessionLease, AdapterError> {
        if self
            .0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Ok(SessionLease(Arc::clone(&self.0)))
        } else {
            Err(AdapterError::SessionBusy)
        }
    }

    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// RAII proof that the session slot is held. Dropping it releases the slot.
#[derive(Debug)]
pub struct SessionLease(Arc<AtomicBool>);

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One connected adapter instance. Owns the lifecycle of the underlying
/// hardware/simulator resources: created at the start of a collection or
/// rollout run, destroyed on shutdown or fault. The session is an explicitly
/// owned handle passed to the scheduler, never a module-level singleton, so tests can run several against distinct backends.
pub struct BackendSession {
    backend_id: BackendId,
    adapter: Box<dyn BackendAdapter>,
    // Held for the session's lifetime; released on drop.
    _lease: SessionLease,
}

impl BackendSession {
    pub fn new(
        backend_id: BackendId,
        adapter: Box<dyn BackendAdapter>,
        lease: SessionLease,
    ) -> Self {
        Self {
            backend_id,
            adapter,
            _lease: lease,
        }
    }

    pub fn backend_id(&self) -> &BackendId {
        &self.backend_id
    }

    pub fn joint_count(&self) -> usize {
        self.adapter.joint_count()
    }

    pub fn read_state(&mut self) -> Result<RawState, AdapterError> {
        self.adapter.read_state()
    }

    pub fn send_command(
        &mut self,
        action: &Action,
        timeout: Duration,
    ) -> Result<CommandAck, AdapterError> {
        self.adapter.send_command(action, timeout)
    }
}

impl Drop for BackendSession {
    fn drop(&mut self) {
        self.adapter.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_rejects_second_claim_until_lease_drops() {
        let slot = SessionSlot::new();
        let lease = slot.claim().expect("first claim");
        assert!(slot.is_held());
        assert!(matches!(slot.claim(), Err(AdapterError::SessionBusy)));
        drop(lease);
        assert!(!slot.is_held());
        assert!(slot.claim().is_ok());
    }

    #[test]
    fn session_fault_classification() {
        assert!(AdapterError::BackendUnavailable("gone".into()).is_session_fault());
        assert!(!AdapterError::CommandRejected("range".into()).is_session_fault());
        assert!(!AdapterError::CommandTimeout {
            timeout: Duration::from_millis(50)
        }
        .is_session_fault());
    }
}
