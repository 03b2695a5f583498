use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::client::lock;
use crate::types::Session;

/// Namespaced key of the session mirror.
pub const CACHE_KEY: &str = "lomi.auth.session";

/// Durable client-side string storage (`localStorage` in a browser).
///
/// Shared by every tab of the same origin, without ordering between tabs: last
/// writer wins.
pub trait DurableCache: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: String);
    fn delete(&self, key: &str);
}

/// Process-local [`DurableCache`]. Clones share the same entries, like two tabs
/// sharing one origin's storage.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableCache for MemoryCache {
    fn read(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn write(&self, key: &str, value: String) {
        lock(&self.entries).insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        lock(&self.entries).remove(key);
    }
}

/// Last known session, JSON under [`CACHE_KEY`].
///
/// Read once, to paint something better than "signed out" while the backend is
/// asked. Overwritten or cleared whenever the backend answers; never merged and
/// never consulted for a decision.
pub(crate) struct CacheMirror {
    cache: Arc<dyn DurableCache>,
}

impl CacheMirror {
    pub(crate) fn new(cache: Arc<dyn DurableCache>) -> Self {
        Self { cache }
    }

    /// Mirrored session, if present, parseable and not yet expired.
    pub(crate) fn load(&self) -> Option<Session> {
        let raw = self.cache.read(CACHE_KEY)?;
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) if !session.is_expired() => Some(session),
            Ok(_) => {
                tracing::debug!("Mirrored session already expired");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable session mirror");
                self.clear();
                None
            }
        }
    }

    pub(crate) fn save(&self, session: &Session) {
        match serde_json::to_string(session) {
            Ok(json) => self.cache.write(CACHE_KEY, json),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize session mirror"),
        }
    }

    pub(crate) fn clear(&self) {
        self.cache.delete(CACHE_KEY);
    }
}
