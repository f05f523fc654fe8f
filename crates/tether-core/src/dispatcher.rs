//! Request/response cycle shared by every request kind.
//!
//! ```text
//! Idle ─► KeyComputed ─► Registered ─► ExternalRequestIssued ─► AwaitingResponse ─┬─► Resolved
//!                            │                                                    └─► Cancelled
//!                            └─ DuplicateKey: abort, nothing issued
//! ```
//!
//! The request side runs on the designated context and parks on the slot's
//! `receive`. The callback side looks the slot up by key and queues the
//! `send` onto the same context, so result delivery is ordered with other
//! main-context work and never runs under the registry lock.
//!
//! Cleanup lives in a guard owned by the request future: normal return,
//! error, and dropping the future mid-wait all close the slot and
//! unregister the key exactly once.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{debug, error};

use crate::context::ExecutionContext;
use crate::error::{RegistryError, Result, SlotError};
use crate::key::CorrelationKey;
use crate::registry::Registry;
use crate::slot::{ResponseSlot, SlotState};

/// Outcome of handing a host callback to [`Dispatcher::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A pending slot was found; the send is queued on the context.
    Scheduled,
    /// No live requester (session gone, cycle finished, or spurious code).
    Dropped,
}

/// Registered slot plus the obligation to unregister it.
struct Cycle<T> {
    registry: Arc<Registry>,
    key: CorrelationKey,
    slot: ResponseSlot<T>,
}

impl<T> Drop for Cycle<T> {
    fn drop(&mut self) {
        self.slot.close();
        self.registry.unregister(&self.key);
        debug!(key = %self.key, "request cycle finished");
    }
}

/// Drives request cycles against one session's registry.
///
/// Holds only a weak reference: the [`crate::session::SessionStore`] owns
/// the registry, and a dispatcher outliving its session simply finds
/// nothing to talk to.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Weak<Registry>,
    context: Arc<dyn ExecutionContext>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("context", &self.context.name())
            .field("attached", &(self.registry.strong_count() > 0))
            .finish()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: &Arc<Registry>, context: Arc<dyn ExecutionContext>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            context,
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<dyn ExecutionContext> {
        &self.context
    }

    /// The registry, if its session is still alive.
    #[must_use]
    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }

    /// Run one request cycle under `key`.
    ///
    /// `issue` fires the external request; it runs only after the key is
    /// registered, and never when registration fails. It may also resolve
    /// the slot itself when no external request is needed.
    pub async fn dispatch<T, F>(&self, key: CorrelationKey, issue: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ResponseSlot<T>) -> Result<()>,
    {
        self.context.assert_current("request dispatch");
        let registry = self.registry.upgrade().ok_or(RegistryError::Destroyed)?;
        let slot = registry.register(key, ResponseSlot::new())?;
        let cycle = Cycle {
            registry,
            key,
            slot,
        };

        issue(&cycle.slot)?;
        debug!(key = %key, context = self.context.name(), "awaiting response");

        let value = cycle.slot.receive().await?;
        Ok(value)
    }

    /// Route a host callback to the requester parked under `key`.
    ///
    /// `build` constructs the payload and only runs when a requester exists.
    /// Late or spurious callbacks are dropped without error.
    pub fn deliver<T, F>(&self, key: CorrelationKey, build: F) -> Delivery
    where
        T: Send + 'static,
        F: FnOnce() -> T,
    {
        self.context.assert_current("callback delivery");
        let Some(registry) = self.registry.upgrade() else {
            debug!(key = %key, "session destroyed; dropping callback");
            return Delivery::Dropped;
        };
        let Some(slot) = registry.find::<T>(&key) else {
            debug!(key = %key, "no pending request; dropping callback");
            return Delivery::Dropped;
        };
        let value = build();
        self.context
            .dispatch(Box::new(move || complete(key, &slot, value)));
        Delivery::Scheduled
    }

    /// Queue `job` onto the designated context. Callable from any thread.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        self.context.dispatch(Box::new(job));
    }
}

fn complete<T>(key: CorrelationKey, slot: &ResponseSlot<T>, value: T) {
    match slot.send(value) {
        Ok(()) => debug!(key = %key, "response delivered"),
        Err(SlotError::InvalidState {
            state: SlotState::Closed,
        }) => {
            debug!(key = %key, "requester abandoned the cycle; dropping response");
        }
        Err(err) => {
            error!(key = %key, error = %err, "response delivered twice for one request");
            panic!("duplicate callback delivery for {key}: {err}");
        }
    }
}
