//! # Correlation store
//!
//! Carries the admitting user's identity from the admission path to the
//! watch path despite the two arriving over separate, unordered channels.
//! Keyed by sanitized content so both sides agree on a key without sharing
//! any request identifier.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::model::{ActorIdentity, Operation, ResourceIdentifier};

/// `group/version/resource/namespace/name : operation : contentFingerprint`.
/// Deterministic and byte-stable because both the admission and watch sides
/// sanitize before hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespace: Option<String>,
    pub name: String,
    pub operation: Operation,
    pub content_fingerprint: u64,
}

impl CorrelationKey {
    #[must_use]
    pub fn new(identifier: &ResourceIdentifier, operation: Operation, content_fingerprint: u64) -> Self {
        Self {
            group: identifier.group.clone(),
            version: identifier.version.clone(),
            resource: identifier.resource.clone(),
            namespace: identifier.namespace.clone(),
            name: identifier.name.clone(),
            operation,
            content_fingerprint,
        }
    }
}

struct TimedIdentity {
    identity: ActorIdentity,
    inserted_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CorrelationKey, VecDeque<TimedIdentity>>,
    /// Whole-key insertion order, used to pick an LRU eviction victim in
    /// O(1) amortized time. A key may appear more than once if it was
    /// re-inserted after being fully drained; `entries` is the source of
    /// truth for whether a queued key reference is still live.
    key_order: VecDeque<CorrelationKey>,
}

/// Eviction/hit counters, exposed via `stats()` for the Prometheus
/// integration in `observability::metrics`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorrelationStats {
    pub hits: u64,
    pub misses: u64,
    pub ttl_evictions: u64,
    pub lru_evictions: u64,
}

/// Bounded TTL+LRU FIFO mapping from a [`CorrelationKey`] to a queue of
/// actor identities. All operations are O(1) amortized and perform no I/O.
pub struct CorrelationStore {
    inner: Mutex<Inner>,
    ttl: Duration,
    max_keys: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    ttl_evictions: AtomicU64,
    lru_evictions: AtomicU64,
}

impl CorrelationStore {
    #[must_use]
    pub fn new(ttl: Duration, max_keys: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl,
            max_keys,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            ttl_evictions: AtomicU64::new(0),
            lru_evictions: AtomicU64::new(0),
        }
    }

    /// Enqueues `identity` under `key`. Multiple puts under the same key
    /// enqueue in arrival order; each `take_one` consumes the oldest first.
    pub fn put(&self, key: CorrelationKey, identity: ActorIdentity) {
        let mut inner = self.inner.lock().expect("correlation store mutex poisoned");
        let is_new_key = !inner.entries.contains_key(&key);
        inner
            .entries
            .entry(key.clone())
            .or_default()
            .push_back(TimedIdentity {
                identity,
                inserted_at: Instant::now(),
            });
        if is_new_key {
            inner.key_order.push_back(key);
        }
        self.evict_lru_if_needed(&mut inner);
    }

    /// Consumes and returns the oldest non-expired identity under `key`, or
    /// `None` on a miss (no entry, or all entries expired).
    pub fn take_one(&self, key: &CorrelationKey) -> Option<ActorIdentity> {
        let mut inner = self.inner.lock().expect("correlation store mutex poisoned");
        let now = Instant::now();
        let result = loop {
            let Some(queue) = inner.entries.get_mut(key) else {
                break None;
            };
            let Some(front) = queue.pop_front() else {
                break None;
            };
            if now.duration_since(front.inserted_at) > self.ttl {
                self.ttl_evictions.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            break Some(front.identity);
        };
        if let Some(queue) = inner.entries.get(key) {
            if queue.is_empty() {
                inner.entries.remove(key);
            }
        }
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Periodic sweep dropping expired entries that would otherwise sit
    /// unread until their key is next looked up. Internal housekeeping, not
    /// required for correctness of `take_one`'s own TTL check.
    pub fn purge_expired(&self) {
        let mut inner = self.inner.lock().expect("correlation store mutex poisoned");
        let now = Instant::now();
        let ttl = self.ttl;
        let mut expired = 0u64;
        inner.entries.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|entry| now.duration_since(entry.inserted_at) <= ttl);
            expired += (before - queue.len()) as u64;
            !queue.is_empty()
        });
        if expired > 0 {
            self.ttl_evictions.fetch_add(expired, Ordering::Relaxed);
        }
    }

    fn evict_lru_if_needed(&self, inner: &mut Inner) {
        while inner.entries.len() > self.max_keys {
            let Some(victim) = inner.key_order.pop_front() else {
                break;
            };
            if inner.entries.remove(&victim).is_some() {
                self.lru_evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> CorrelationStats {
        CorrelationStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_evictions: self.ttl_evictions.load(Ordering::Relaxed),
            lru_evictions: self.lru_evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn key(n: &str) -> CorrelationKey {
        let id = ResourceIdentifier::new("", "v1", "configmaps", Some("app-a".into()), n);
        CorrelationKey::new(&id, Operation::Update, 42)
    }

    fn identity(user: &str) -> ActorIdentity {
        ActorIdentity::new(user, Utc::now())
    }

    #[test]
    fn fifo_per_key_returns_identities_in_insertion_order() {
        let store = CorrelationStore::new(Duration::from_secs(60), 1000);
        let k = key("settings");
        store.put(k.clone(), identity("alice"));
        store.put(k.clone(), identity("bob"));
        assert_eq!(store.take_one(&k).unwrap().username, "alice");
        assert_eq!(store.take_one(&k).unwrap().username, "bob");
        assert!(store.take_one(&k).is_none());
    }

    #[test]
    fn miss_on_unknown_key() {
        let store = CorrelationStore::new(Duration::from_secs(60), 1000);
        assert!(store.take_one(&key("unknown")).is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn ttl_expiry_counts_as_miss_and_is_never_returned() {
        let store = CorrelationStore::new(Duration::from_millis(1), 1000);
        let k = key("settings");
        store.put(k.clone(), identity("alice"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(store.take_one(&k).is_none());
        assert_eq!(store.stats().ttl_evictions, 1);
    }

    #[test]
    fn lru_overflow_evicts_exactly_the_oldest_key_whole() {
        let store = CorrelationStore::new(Duration::from_secs(60), 2);
        let k1 = key("a");
        let k2 = key("b");
        let k3 = key("c");
        store.put(k1.clone(), identity("alice"));
        store.put(k1.clone(), identity("alice-2"));
        store.put(k2.clone(), identity("bob"));
        store.put(k3.clone(), identity("carol"));

        // k1 was oldest and should be evicted whole (both queued entries gone).
        assert!(store.take_one(&k1).is_none());
        assert_eq!(store.take_one(&k2).unwrap().username, "bob");
        assert_eq!(store.take_one(&k3).unwrap().username, "carol");
        assert_eq!(store.stats().lru_evictions, 1);
    }

    #[test]
    fn purge_expired_removes_stale_entries_without_a_lookup() {
        let store = CorrelationStore::new(Duration::from_millis(1), 1000);
        let k = key("settings");
        store.put(k.clone(), identity("alice"));
        std::thread::sleep(Duration::from_millis(20));
        store.purge_expired();
        assert_eq!(store.stats().ttl_evictions, 1);
        assert!(store.take_one(&k).is_none());
    }
}
