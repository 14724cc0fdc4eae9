//! Session token cache with sliding expiration.
//!
//! Every operation first purges entries whose `expires <= now`, so an expired
//! token is never returned even if no sweep ran since it lapsed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        let by = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// User fields stored against a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionUser {
    /// Directory id of the user.
    pub user_id: i64,
    /// Login name.
    pub username: String,
    /// Contact address.
    pub email: String,
    /// Role name.
    pub role: String,
}

/// One cached session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    /// Directory id of the user.
    pub user_id: i64,
    /// Login name.
    pub username: String,
    /// Contact address.
    pub email: String,
    /// Role name.
    pub role: String,
    /// When the entry lapses unless renewed.
    pub expires: DateTime<Utc>,
}

/// Process-wide session cache. Not persisted.
pub struct TokenCache {
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl TokenCache {
    /// Cache using the wall clock.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Cache using `clock`.
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn purge(entries: &mut HashMap<String, CacheEntry>, now: DateTime<Utc>) {
        entries.retain(|_, entry| entry.expires > now);
    }

    /// Store `user` under `token`, replacing any previous entry.
    pub fn insert(&self, token: &str, user: SessionUser) -> CacheEntry {
        let now = self.clock.now();
        let entry = CacheEntry {
            user_id: user.user_id,
            username: user.username,
            email: user.email,
            role: user.role,
            expires: self.expiry_from(now),
        };
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, now);
        let _ = entries.insert(token.to_owned(), entry.clone());
        entry
    }

    /// Look up `token` and renew its expiry.
    pub fn get(&self, token: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let expires = self.expiry_from(now);
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, now);
        let entry = entries.get_mut(token)?;
        entry.expires = expires;
        Some(entry.clone())
    }

    /// Drop `token`. Absent tokens are a no-op.
    pub fn remove(&self, token: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, now);
        entries.remove(token)
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, now);
        entries.len()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3600);

    fn user(name: &str) -> SessionUser {
        SessionUser {
            user_id: 1,
            username: name.into(),
            email: format!("{name}@example.com"),
            role: "admin".into(),
        }
    }

    fn cache() -> (TokenCache, Arc<ManualClock>) {
        let start = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = Arc::new(ManualClock::new(start));
        (TokenCache::with_clock(TTL, clock.clone()), clock)
    }

    #[test]
    fn insert_sets_expiry_from_now() {
        let (cache, clock) = cache();
        let entry = cache.insert("t1", user("ada"));
        assert_eq!(entry.expires, clock.now() + TimeDelta::seconds(3600));
    }

    #[test]
    fn get_returns_and_renews() {
        let (cache, clock) = cache();
        let _ = cache.insert("t1", user("ada"));
        clock.advance(Duration::from_secs(3000));
        let entry = cache.get("t1").unwrap();
        assert_eq!(entry.username, "ada");
        assert_eq!(entry.expires, clock.now() + TimeDelta::seconds(3600));

        // renewed, so still alive past the original expiry
        clock.advance(Duration::from_secs(3000));
        assert!(cache.get("t1").is_some());
    }

    #[test]
    fn expired_token_removed_at_access() {
        let (cache, clock) = cache();
        let _ = cache.insert("t1", user("ada"));
        clock.advance(TTL + Duration::from_secs(1));
        assert!(cache.get("t1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let (cache, clock) = cache();
        let _ = cache.insert("t1", user("ada"));
        clock.advance(TTL);
        assert!(cache.get("t1").is_none());
    }

    #[test]
    fn insert_overwrites() {
        let (cache, _) = cache();
        let _ = cache.insert("t1", user("ada"));
        let _ = cache.insert("t1", user("bob"));
        assert_eq!(cache.get("t1").unwrap().username, "bob");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_then_get_is_none() {
        let (cache, _) = cache();
        let _ = cache.insert("t1", user("ada"));
        assert!(cache.remove("t1").is_some());
        assert!(cache.get("t1").is_none());
    }

    #[test]
    fn remove_absent_is_noop() {
        let (cache, _) = cache();
        assert!(cache.remove("ghost").is_none());
    }

    #[test]
    fn insert_purges_other_expired_entries() {
        let (cache, clock) = cache();
        let _ = cache.insert("old", user("ada"));
        clock.advance(TTL + Duration::from_secs(5));
        let _ = cache.insert("new", user("bob"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("old").is_none());
    }

    #[test]
    fn entries_expire_independently() {
        let (cache, clock) = cache();
        let _ = cache.insert("a", user("ada"));
        clock.advance(Duration::from_secs(1800));
        let _ = cache.insert("b", user("bob"));
        clock.advance(Duration::from_secs(1801));
        assert!(cache.get("b").is_some());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn entry_serializes_expiry_as_rfc3339() {
        let (cache, _) = cache();
        let entry = cache.insert("t", user("ada"));
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["expires"], "2026-01-01T01:00:00Z");
    }
}
