// talos_core/src/latest.rs

//! Single-slot "latest value" cells. Producers overwrite, consumers read the
//! newest value; there is no queue, so a slow consumer sees staleness rather
//! than backlog.

use std::sync::{Arc, Mutex};

/// A shared one-element cell. Cloning yields another handle to the same slot.
#[derive(Debug)]
pub struct Latest<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Latest<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Latest<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace whatever is in the slot with `value`.
    pub fn publish(&self, value: T) {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(value);
    }

    /// Remove and return the newest value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        slot.take()
    }
}

impl<T: Clone> Latest<T> {
    /// Read the newest value without consuming it.
    pub fn peek(&self) -> Option<T> {
        let slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        slot.clone()
    }
}
