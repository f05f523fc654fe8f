//! Session-scoped registries.
//!
//! A session is the logical UI unit that survives transient teardown of its
//! visible screen (rotation, reconfiguration). Its registry lives here, not
//! on the screen object, so a rebuilt dispatcher for the same session keeps
//! seeing requests started before the rebuild. Only [`SessionStore::destroy`]
//! ends the session, failing every pending request with
//! [`crate::error::SlotError::Closed`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::ExecutionContext;
use crate::dispatcher::Dispatcher;
use crate::registry::Registry;

/// Stable identity of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Anything that can name the session it belongs to.
///
/// Hosts implement this on their screen or view-model type so the store can
/// be queried with the object at hand.
pub trait SessionIdentity {
    fn session_key(&self) -> SessionKey;
}

impl SessionIdentity for SessionKey {
    fn session_key(&self) -> SessionKey {
        self.clone()
    }
}

impl SessionIdentity for str {
    fn session_key(&self) -> SessionKey {
        SessionKey::from(self)
    }
}

/// Owner of one [`Registry`] per live session.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, Arc<Registry>>>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.lock().len())
            .finish()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the session, created on first use.
    pub fn get_or_create<S: SessionIdentity + ?Sized>(&self, identity: &S) -> Arc<Registry> {
        let key = identity.session_key();
        let mut sessions = self.sessions.lock();
        if let Some(registry) = sessions.get(&key) {
            return Arc::clone(registry);
        }
        debug!(session = %key, "creating session registry");
        let registry = Arc::new(Registry::new());
        sessions.insert(key, Arc::clone(&registry));
        registry
    }

    /// Registry of the session, if it exists.
    pub fn get<S: SessionIdentity + ?Sized>(&self, identity: &S) -> Option<Arc<Registry>> {
        self.sessions.lock().get(&identity.session_key()).cloned()
    }

    /// Dispatcher bound to the session's registry.
    ///
    /// Cheap to call again after the screen is rebuilt; the new dispatcher
    /// shares the registry with the old one.
    pub fn dispatcher<S: SessionIdentity + ?Sized>(
        &self,
        identity: &S,
        context: Arc<dyn ExecutionContext>,
    ) -> Dispatcher {
        Dispatcher::new(&self.get_or_create(identity), context)
    }

    /// End the session: drop its registry and close every pending slot.
    ///
    /// Returns the number of requests cancelled, or `None` if the session
    /// did not exist. Late callbacks for the session are dropped afterwards.
    pub fn destroy<S: SessionIdentity + ?Sized>(&self, identity: &S) -> Option<usize> {
        let key = identity.session_key();
        let registry = self.sessions.lock().remove(&key)?;
        let cancelled = registry.close();
        info!(session = %key, cancelled, "session destroyed");
        Some(cancelled)
    }

    #[must_use]
    pub fn contains<S: SessionIdentity + ?Sized>(&self, identity: &S) -> bool {
        self.sessions.lock().contains_key(&identity.session_key())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of live sessions, sorted.
    #[must_use]
    pub fn session_keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<_> = self.sessions.lock().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        for (key, registry) in self.sessions.get_mut().drain() {
            let cancelled = registry.close();
            if cancelled > 0 {
                debug!(session = %key, cancelled, "closing session on store drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MainThread;
    use crate::key::{CorrelationKey, RequestCode};
    use crate::slot::{ResponseSlot, SlotState};

    struct Screen {
        session: &'static str,
    }

    impl SessionIdentity for Screen {
        fn session_key(&self) -> SessionKey {
            SessionKey::from(self.session)
        }
    }

    fn key(code: u16) -> CorrelationKey {
        CorrelationKey::activity(RequestCode::new(code))
    }

    #[test]
    fn same_identity_shares_registry() {
        let store = SessionStore::new();
        let first = store.get_or_create(&Screen { session: "checkout" });
        let rebuilt = store.get_or_create(&Screen { session: "checkout" });
        assert!(Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn distinct_sessions_are_isolated() {
        let store = SessionStore::new();
        let a = store.get_or_create("a");
        let b = store.get_or_create("b");
        a.register(key(1), ResponseSlot::<i32>::new()).unwrap();
        assert!(!b.contains(&key(1)));
        assert_eq!(
            store.session_keys(),
            vec![SessionKey::from("a"), SessionKey::from("b")]
        );
    }

    #[test]
    fn get_does_not_create() {
        let store = SessionStore::new();
        assert!(store.get("missing").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn destroy_closes_pending_slots() {
        let store = SessionStore::new();
        let registry = store.get_or_create("s");
        let slot = registry.register(key(9), ResponseSlot::<i32>::new()).unwrap();

        assert_eq!(store.destroy("s"), Some(1));
        assert_eq!(slot.state(), SlotState::Closed);
        assert!(registry.is_destroyed());
        assert!(!store.contains("s"));
        assert_eq!(store.destroy("s"), None);
    }

    #[test]
    fn recreated_session_gets_fresh_registry() {
        let store = SessionStore::new();
        let old = store.get_or_create("s");
        store.destroy("s");
        let fresh = store.get_or_create("s");
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(!fresh.is_destroyed());
    }

    #[test]
    fn dispatcher_detaches_after_destroy() {
        let store = SessionStore::new();
        let (context, _main_loop) = MainThread::current();
        let dispatcher = store.dispatcher("s", context.shared());
        assert!(dispatcher.registry().is_some());
        store.destroy("s");
        assert!(dispatcher.registry().is_none());
    }

    #[test]
    fn dropping_store_closes_everything() {
        let store = SessionStore::new();
        let slot = store
            .get_or_create("s")
            .register(key(2), ResponseSlot::<u8>::new())
            .unwrap();
        drop(store);
        assert!(slot.is_closed());
    }

    #[test]
    fn session_key_serde_is_transparent() {
        let json = serde_json::to_string(&SessionKey::from("main-screen")).unwrap();
        assert_eq!(json, r#""main-screen""#);
    }
}
