//! Visit/visitor identity resolution.
//!
//! Tokens live in a durable key-value store with per-entry TTL (cookies in a
//! browser host). The store must be readable immediately after a write within
//! the same execution context: a freshly written visit token is read back
//! before it is trusted, which guards against environments where cookie
//! writes silently fail. Absence of identity is a valid outcome, never an
//! error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AgentConfig;

pub const VISIT_KEY: &str = "tvunna_visit";
pub const VISITOR_KEY: &str = "tvunna_visitor";

/// Visit tokens bound the session window.
pub const VISIT_TTL_MINUTES: u64 = 4 * 60;
/// Visitor tokens span many visits.
pub const VISITOR_TTL_MINUTES: u64 = 2 * 365 * 24 * 60;

/// Durable key-value persistence with TTL, the cookie-equivalent seam.
///
/// `set` has no error channel on purpose: hosts where writes can fail do so
/// silently (cookies), and the caller confirms persistence by reading back.
pub trait KeyValueStore: Send + Sync {
    fn set(&self, key: &str, value: &str, ttl_minutes: u64);
    fn get(&self, key: &str) -> Option<String>;
    fn delete(&self, key: &str);
}

/// In-memory store with TTL. Default for non-browser hosts and tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn set(&self, key: &str, value: &str, ttl_minutes: u64) {
        let expires = Instant::now() + Duration::from_secs(ttl_minutes * 60);
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .insert(key.to_string(), (value.to_string(), expires));
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn delete(&self, key: &str) {
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .remove(key);
    }
}

/// Resolved identity pair for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub visit: Option<String>,
    pub visitor: Option<String>,
}

#[derive(Default)]
struct IdentityCache {
    visit: Option<String>,
    visitor: Option<String>,
}

/// Resolves, creates and destroys the visit/visitor tokens.
///
/// Only confirmed tokens are cached; an unconfirmed write yields an absent
/// identity for the current call and is retried on the next one.
pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
    enabled: bool,
    auto_generate: bool,
    cache: Mutex<IdentityCache>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &AgentConfig) -> Self {
        Self {
            store,
            enabled: config.identity_enabled,
            auto_generate: config.identity_auto_generate,
            cache: Mutex::new(IdentityCache::default()),
        }
    }

    /// Current visit token. Cache, then store (refreshing the TTL on a hit),
    /// then generation-on-demand with a confirming read-back.
    pub fn resolve_visit(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let mut cache = self.cache.lock().expect("identity mutex poisoned");
        self.visit_locked(&mut cache)
    }

    /// Current visitor token. Only attempted once a confirmed visit token
    /// exists; created with the long TTL, never regenerated once present.
    pub fn resolve_visitor(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let mut cache = self.cache.lock().expect("identity mutex poisoned");
        let visit = self.visit_locked(&mut cache)?;
        self.visitor_locked(&mut cache, &visit)
    }

    /// Both tokens, resolved in the required order.
    pub fn resolve(&self) -> ResolvedIdentity {
        if !self.enabled {
            debug!("visit tracking disabled");
            return ResolvedIdentity::default();
        }
        let mut cache = self.cache.lock().expect("identity mutex poisoned");
        let visit = self.visit_locked(&mut cache);
        let visitor = visit
            .as_deref()
            .and_then(|v| self.visitor_locked(&mut cache, v));
        ResolvedIdentity { visit, visitor }
    }

    /// Deletes both durable entries and clears the cache. Idempotent.
    pub fn reset(&self) {
        self.store.delete(VISIT_KEY);
        self.store.delete(VISITOR_KEY);
        let mut cache = self.cache.lock().expect("identity mutex poisoned");
        *cache = IdentityCache::default();
        debug!("identity reset");
    }

    fn visit_locked(&self, cache: &mut IdentityCache) -> Option<String> {
        if let Some(visit) = &cache.visit {
            return Some(visit.clone());
        }
        if let Some(visit) = self.store.get(VISIT_KEY) {
            // Refresh the session window on each read.
            self.store.set(VISIT_KEY, &visit, VISIT_TTL_MINUTES);
            cache.visit = Some(visit.clone());
            return Some(visit);
        }
        if !self.auto_generate {
            return None;
        }

        let visit = Uuid::new_v4().to_string();
        self.store.set(VISIT_KEY, &visit, VISIT_TTL_MINUTES);
        match self.store.get(VISIT_KEY) {
            Some(read_back) if read_back == visit => {
                debug!(token = %visit, "visit started");
                cache.visit = Some(visit.clone());
                Some(visit)
            }
            _ => {
                warn!("identity store write not confirmed, proceeding without identity");
                None
            }
        }
    }

    fn visitor_locked(&self, cache: &mut IdentityCache, _confirmed_visit: &str) -> Option<String> {
        if let Some(visitor) = &cache.visitor {
            return Some(visitor.clone());
        }
        if let Some(visitor) = self.store.get(VISITOR_KEY) {
            cache.visitor = Some(visitor.clone());
            return Some(visitor);
        }
        if !self.auto_generate {
            return None;
        }

        let visitor = Uuid::new_v4().to_string();
        self.store.set(VISITOR_KEY, &visitor, VISITOR_TTL_MINUTES);
        match self.store.get(VISITOR_KEY) {
            Some(read_back) if read_back == visitor => {
                debug!(token = %visitor, "visitor started");
                cache.visitor = Some(visitor.clone());
                Some(visitor)
            }
            _ => {
                warn!("visitor token write not confirmed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store whose writes vanish, like a host with cookies blocked.
    struct BlockedStore;

    impl KeyValueStore for BlockedStore {
        fn set(&self, _key: &str, _value: &str, _ttl_minutes: u64) {}
        fn get(&self, _key: &str) -> Option<String> {
            None
        }
        fn delete(&self, _key: &str) {}
    }

    fn identity_store(enabled: bool) -> IdentityStore {
        let config = AgentConfig::default().with_identity(enabled);
        IdentityStore::new(Arc::new(MemoryStore::new()), &config)
    }

    #[test]
    fn resolve_is_idempotent_within_ttl() {
        let ids = identity_store(true);
        let first = ids.resolve();
        let second = ids.resolve();
        assert!(first.visit.is_some());
        assert!(first.visitor.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn reset_yields_fresh_tokens() {
        let ids = identity_store(true);
        let before = ids.resolve();
        ids.reset();
        let after = ids.resolve();
        assert!(after.visit.is_some());
        assert_ne!(before.visit, after.visit);
        assert_ne!(before.visitor, after.visitor);
    }

    #[test]
    fn reset_is_idempotent() {
        let ids = identity_store(true);
        ids.resolve();
        ids.reset();
        ids.reset();
        assert!(ids.resolve().visit.is_some());
    }

    #[test]
    fn disabled_identity_is_absent() {
        let ids = identity_store(false);
        assert_eq!(ids.resolve(), ResolvedIdentity::default());
        assert_eq!(ids.resolve_visit(), None);
        assert_eq!(ids.resolve_visitor(), None);
    }

    #[test]
    fn no_visitor_without_confirmed_visit() {
        let config = AgentConfig::default().with_identity(true);
        let ids = IdentityStore::new(Arc::new(BlockedStore), &config);
        let resolved = ids.resolve();
        assert_eq!(resolved.visit, None);
        assert_eq!(resolved.visitor, None);
        assert_eq!(ids.resolve_visitor(), None);
    }

    #[test]
    fn auto_generate_off_reads_but_never_creates() {
        let store = Arc::new(MemoryStore::new());
        let config = AgentConfig::default()
            .with_identity(true)
            .with_identity_auto_generate(false);
        let ids = IdentityStore::new(store.clone(), &config);
        assert_eq!(ids.resolve_visit(), None);

        store.set(VISIT_KEY, "existing", VISIT_TTL_MINUTES);
        assert_eq!(ids.resolve_visit().as_deref(), Some("existing"));
    }

    #[test]
    fn visitor_survives_visit_expiry() {
        let store = Arc::new(MemoryStore::new());
        let config = AgentConfig::default().with_identity(true);
        let ids = IdentityStore::new(store.clone(), &config);
        let first = ids.resolve();

        // New session window: visit gone from the store, visitor still there.
        store.delete(VISIT_KEY);
        let ids = IdentityStore::new(store, &config);
        let second = ids.resolve();
        assert_ne!(first.visit, second.visit);
        assert_eq!(first.visitor, second.visitor);
    }
}
