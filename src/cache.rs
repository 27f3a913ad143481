//! Short-lived permission cache.
//!
//! The TTL is deliberately short: a role change must take effect almost
//! immediately, so the cache only bounds database load, not freshness.
//! Callers changing role or project assignments must call
//! [`PermissionCache::invalidate`] synchronously in addition to relying on
//! expiry. Concurrent fetches for the same user may race; last write wins
//! and the TTL bounds the damage.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::access::{PermissionProfile, ProfileSource};
use crate::error::Result;

/// Recommended TTL: long enough to absorb request bursts, short enough to
/// bound the privilege-escalation window after a role change.
pub const DEFAULT_PROFILE_TTL_SECS: i64 = 10;

struct CacheEntry {
    profile: PermissionProfile,
    cached_at: DateTime<Utc>,
}

pub struct PermissionCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::seconds(DEFAULT_PROFILE_TTL_SECS))
    }

    /// Return the cached profile when fresh, otherwise resolve through
    /// `source`, store and return. The fetch runs without holding the lock,
    /// so two concurrent misses for the same user both hit the store.
    pub fn get_or_fetch(
        &self,
        user_id: &str,
        source: &dyn ProfileSource,
    ) -> Result<PermissionProfile> {
        let now = Utc::now();
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(user_id) {
                if now - entry.cached_at < self.ttl {
                    return Ok(entry.profile.clone());
                }
            }
        }

        debug!(user = %user_id, "permission cache miss, resolving from store");
        let profile = source.resolve(user_id)?;
        self.entries.write().insert(
            user_id.to_string(),
            CacheEntry {
                profile: profile.clone(),
                cached_at: now,
            },
        );
        Ok(profile)
    }

    /// Drop one user's entry. Must be called whenever that user's role or
    /// project assignments change.
    pub fn invalidate(&self, user_id: &str) {
        self.entries.write().remove(user_id);
    }

    /// Drop every entry.
    pub fn clear_all(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::access::{PermissionProfile, UserAssignments};
    use crate::error::LifecycleError;

    /// Counts resolutions so tests can observe cache hits vs misses.
    struct CountingSource {
        calls: AtomicUsize,
        known: Vec<String>,
    }

    impl CountingSource {
        fn new(known: &[&str]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                known: known.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl ProfileSource for CountingSource {
        fn resolve(&self, user_id: &str) -> Result<PermissionProfile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.known.contains(&user_id.to_string()) {
                return Err(LifecycleError::NotFound(format!("user '{user_id}'")));
            }
            Ok(PermissionProfile::from_assignments(&UserAssignments {
                roles: vec!["agent".into()],
                project_ids: vec!["proj_1".into()],
                email: None,
            }))
        }
    }

    #[test]
    fn second_lookup_within_ttl_hits_the_cache() {
        let cache = PermissionCache::new(Duration::seconds(30));
        let source = CountingSource::new(&["user_a"]);

        cache.get_or_fetch("user_a", &source).unwrap();
        cache.get_or_fetch("user_a", &source).unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_entries_are_never_served() {
        let cache = PermissionCache::new(Duration::zero());
        let source = CountingSource::new(&["user_a"]);

        cache.get_or_fetch("user_a", &source).unwrap();
        cache.get_or_fetch("user_a", &source).unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_defeats_an_unexpired_entry() {
        let cache = PermissionCache::new(Duration::seconds(3600));
        let source = CountingSource::new(&["user_a"]);

        cache.get_or_fetch("user_a", &source).unwrap();
        cache.invalidate("user_a");
        cache.get_or_fetch("user_a", &source).unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn entries_do_not_cross_users() {
        let cache = PermissionCache::new(Duration::seconds(3600));
        let source = CountingSource::new(&["user_a"]);

        cache.get_or_fetch("user_a", &source).unwrap();
        // user_b is unknown: the cached user_a entry must not leak
        let err = cache.get_or_fetch("user_b", &source).unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }

    #[test]
    fn unknown_users_fail_with_not_found() {
        let cache = PermissionCache::with_default_ttl();
        let source = CountingSource::new(&[]);
        assert!(matches!(
            cache.get_or_fetch("ghost", &source),
            Err(LifecycleError::NotFound(_))
        ));
    }
}
