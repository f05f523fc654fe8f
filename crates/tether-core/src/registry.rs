//! Keyed registry of pending response slots.
//!
//! One registry serves every request kind of a session, so slots are stored
//! type-erased and recovered by downcast on lookup. A key is present iff a
//! request under it is still outstanding; the dispatcher's cycle guard is
//! the only path that removes entries during normal operation.
//!
//! Every operation takes the single lock for O(1) work and never touches
//! slot wake-ups while holding it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::key::CorrelationKey;
use crate::slot::{ResponseSlot, SlotState};

/// Type-erased view of a registered slot.
trait PendingSlot: Send + Sync {
    fn close(&self);
    fn state(&self) -> SlotState;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + 'static> PendingSlot for ResponseSlot<T> {
    fn close(&self) {
        ResponseSlot::close(self);
    }

    fn state(&self) -> SlotState {
        ResponseSlot::state(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct RegistryState {
    slots: HashMap<CorrelationKey, Box<dyn PendingSlot>>,
    destroyed: bool,
}

/// Thread-safe `CorrelationKey → ResponseSlot` mapping.
#[derive(Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Registry")
            .field("pending", &state.slots.len())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `slot` under `key` and hand it back.
    ///
    /// Fails with [`RegistryError::DuplicateKey`] if the key is live (the
    /// offered slot is not stored) and with [`RegistryError::Destroyed`]
    /// once [`Registry::close`] has run.
    pub fn register<T: Send + 'static>(
        &self,
        key: CorrelationKey,
        slot: ResponseSlot<T>,
    ) -> Result<ResponseSlot<T>, RegistryError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(RegistryError::Destroyed);
        }
        if state.slots.contains_key(&key) {
            warn!(key = %key, "registration collides with a pending request");
            return Err(RegistryError::DuplicateKey { key });
        }
        state.slots.insert(key, Box::new(slot.clone()));
        debug!(key = %key, pending = state.slots.len(), "slot registered");
        Ok(slot)
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn unregister(&self, key: &CorrelationKey) -> bool {
        let mut state = self.state.lock();
        let removed = state.slots.remove(key).is_some();
        if removed {
            debug!(key = %key, pending = state.slots.len(), "slot unregistered");
        }
        removed
    }

    /// Non-failing lookup used by the callback path.
    ///
    /// Returns `None` when the key is absent, which is expected after
    /// teardown, and also when the entry carries another payload type.
    pub fn find<T: Send + 'static>(&self, key: &CorrelationKey) -> Option<ResponseSlot<T>> {
        let state = self.state.lock();
        let entry = state.slots.get(key)?;
        let slot = entry.as_any().downcast_ref::<ResponseSlot<T>>().cloned();
        if slot.is_none() {
            warn!(key = %key, "pending slot has a different payload type");
        }
        slot
    }

    /// Failing lookup for callers that guaranteed prior registration.
    pub fn get<T: Send + 'static>(
        &self,
        key: &CorrelationKey,
    ) -> Result<ResponseSlot<T>, RegistryError> {
        let state = self.state.lock();
        let entry = state
            .slots
            .get(key)
            .ok_or(RegistryError::NotFound { key: *key })?;
        entry
            .as_any()
            .downcast_ref::<ResponseSlot<T>>()
            .cloned()
            .ok_or(RegistryError::TypeMismatch { key: *key })
    }

    #[must_use]
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.state.lock().slots.contains_key(key)
    }

    /// Number of outstanding registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently registered, sorted.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<CorrelationKey> {
        let mut keys: Vec<_> = self.state.lock().slots.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// State of the slot registered under `key`, if any.
    #[must_use]
    pub fn slot_state(&self, key: &CorrelationKey) -> Option<SlotState> {
        self.state.lock().slots.get(key).map(|slot| slot.state())
    }

    /// True once [`Registry::close`] has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Destroy the registry: close every pending slot so blocked receivers
    /// observe [`crate::error::SlotError::Closed`], and refuse further
    /// registrations. Returns the number of slots closed.
    pub fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.destroyed = true;
            state.slots.drain().collect()
        };
        for (key, slot) in &drained {
            debug!(key = %key, state = %slot.state(), "closing pending slot");
            slot.close();
        }
        drained.len()
    }
}
