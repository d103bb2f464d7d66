//! Server-side session store.
//!
//! # Responsibilities
//! - Map session ids (carried in a cookie) to session records
//! - Create sessions lazily when the presented id is absent or unknown
//! - Expire sessions by TTL since last access, refreshing on lookup when keep-alive is on
//!
//! # Design Decisions
//! - Sessions live in memory only and are lost on restart
//! - An expired session is indistinguishable from an unknown one
//! - A background sweeper purges expired entries; lookups never return them

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::observability::metrics;

/// A single session record.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: SystemTime,
    last_access: Mutex<Instant>,
    attributes: Mutex<HashMap<String, Value>>,
}

impl Session {
    /// A new session with a generated id.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().simple().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: SystemTime::now(),
            last_access: Mutex::new(Instant::now()),
            attributes: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_access(&self) -> Instant {
        *self.last_access.lock().expect("session mutex poisoned")
    }

    /// Refresh the last-access time.
    pub fn touch(&self) {
        *self.last_access.lock().expect("session mutex poisoned") = Instant::now();
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_access().elapsed() > ttl
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.attributes
            .lock()
            .expect("session mutex poisoned")
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes
            .lock()
            .expect("session mutex poisoned")
            .insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.attributes
            .lock()
            .expect("session mutex poisoned")
            .remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes
            .lock()
            .expect("session mutex poisoned")
            .contains_key(key)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// A thread-safe map from session id to session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<DashMap<String, Arc<Session>>>,
    ttl: Duration,
    keep_alive: bool,
}

impl SessionStore {
    pub fn new(ttl: Duration, keep_alive: bool) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl,
            keep_alive,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resume the session named by `presented`, or create a new one.
    ///
    /// Returns the session and whether it was created by this call.
    pub fn start(&self, presented: Option<&str>) -> (Arc<Session>, bool) {
        if let Some(session) = presented.and_then(|id| self.get(id)) {
            return (session, false);
        }

        let session = Arc::new(Session::new());
        self.insert(Arc::clone(&session));
        tracing::debug!(session_id = %session.id(), "Session started");
        (session, true)
    }

    /// Look up a live session, refreshing it when keep-alive is enabled.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.inner.get(id).map(|entry| Arc::clone(entry.value()))?;
        if session.is_expired(self.ttl) {
            self.inner.remove_if(id, |_, s| s.is_expired(self.ttl));
            metrics::record_session_count(self.inner.len());
            return None;
        }
        if self.keep_alive {
            session.touch();
        }
        Some(session)
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.inner.insert(session.id().to_string(), session);
        metrics::record_session_count(self.inner.len());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .get(id)
            .is_some_and(|entry| !entry.value().is_expired(self.ttl))
    }

    /// Remove a session. Returns it if it existed.
    pub fn stop(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.inner.remove(id).map(|(_, session)| session);
        metrics::record_session_count(self.inner.len());
        removed
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, session| !session.is_expired(self.ttl));
        let purged = before.saturating_sub(self.inner.len());
        if purged > 0 {
            tracing::debug!(purged, remaining = self.inner.len(), "Expired sessions purged");
        }
        metrics::record_session_count(self.inner.len());
        purged
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_creates_when_absent_or_unknown() {
        let store = SessionStore::new(Duration::from_secs(60), true);

        let (first, created) = store.start(None);
        assert!(created);

        let (again, created) = store.start(Some(first.id()));
        assert!(!created);
        assert_eq!(again.id(), first.id());

        let (other, created) = store.start(Some("unknown"));
        assert!(created);
        assert_ne!(other.id(), "unknown");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn attributes_are_shared_between_lookups() {
        let store = SessionStore::new(Duration::from_secs(60), true);
        let (session, _) = store.start(None);
        session.set("user", "alice");

        let found = store.get(session.id()).unwrap();
        assert_eq!(found.get("user"), Some(Value::from("alice")));
        assert_eq!(found.remove("user"), Some(Value::from("alice")));
        assert!(!session.contains("user"));
    }

    #[test]
    fn expired_sessions_are_absent() {
        let store = SessionStore::new(Duration::from_millis(20), false);
        let (session, _) = store.start(None);
        std::thread::sleep(Duration::from_millis(40));

        assert!(!store.contains(session.id()));
        assert!(store.get(session.id()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn keep_alive_extends_lifetime() {
        let store = SessionStore::new(Duration::from_millis(80), true);
        let (session, _) = store.start(None);
        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(30));
            assert!(store.get(session.id()).is_some());
        }
    }

    #[test]
    fn purge_and_stop() {
        let store = SessionStore::new(Duration::from_millis(10), false);
        store.start(None);
        store.start(None);
        std::thread::sleep(Duration::from_millis(30));
        let (live, _) = store.start(None);

        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.stop(live.id()).is_some());
        assert!(store.stop(live.id()).is_none());
    }
}
