//! # Correlation Attribution Tests
//!
//! End-to-end exercise of the sanitize -> fingerprint -> correlation path
//! that lets a watch-informer event recover the admitting user's identity,
//! including the "two users, identical final content" scenario where
//! content-based keying alone would be ambiguous without the FIFO queue.

use std::time::Duration;

use configbutler::correlation::{CorrelationKey, CorrelationStore};
use configbutler::fingerprint::content_fingerprint;
use configbutler::model::{ActorIdentity, Operation, ResourceIdentifier};
use configbutler::sanitize::canonical_bytes;
use serde_json::json;

fn configmap(resource_version: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": "settings",
            "namespace": "app-a",
            "resourceVersion": resource_version,
        },
        "data": {"key": "value"},
    })
}

fn key_for(obj: &serde_json::Value, operation: Operation) -> CorrelationKey {
    let identifier = ResourceIdentifier::new("", "v1", "configmaps", Some("app-a".into()), "settings");
    let bytes = canonical_bytes(obj).expect("sanitize/marshal should succeed");
    let fingerprint = content_fingerprint(&bytes);
    CorrelationKey::new(&identifier, operation, fingerprint)
}

#[test]
fn admission_and_watch_sides_agree_on_the_same_key_despite_differing_resource_versions() {
    // The admission side sees the object at the moment it's submitted; the
    // watch side sees it after the API server has stamped a resourceVersion.
    // Both must sanitize before hashing so they land on the same key.
    let admitted = configmap("1");
    let observed = configmap("999999");

    let admission_key = key_for(&admitted, Operation::Create);
    let watch_key = key_for(&observed, Operation::Create);
    assert_eq!(admission_key, watch_key);
}

#[test]
fn take_one_returns_a_miss_when_no_admission_was_ever_recorded() {
    let store = CorrelationStore::new(Duration::from_secs(60), 10_000);
    let key = key_for(&configmap("1"), Operation::Create);
    assert!(store.take_one(&key).is_none());
    assert_eq!(store.stats().misses, 1);
}

#[test]
fn rapid_identical_edits_by_two_users_are_attributed_in_submission_order() {
    // Spec §8 scenario 2: two users update the same ConfigMap with the same
    // final content 50ms apart. Both admissions enqueue under the identical
    // content-hash key; two watch events must still be attributed to the
    // right user, in the order they were admitted.
    let store = CorrelationStore::new(Duration::from_secs(60), 10_000);
    let key = key_for(&configmap("irrelevant-for-the-key"), Operation::Update);

    store.put(key.clone(), ActorIdentity::new("alice@example.com", chrono::Utc::now()));
    store.put(key.clone(), ActorIdentity::new("bob@example.com", chrono::Utc::now()));

    let first = store.take_one(&key).expect("first watch event should find a match");
    let second = store.take_one(&key).expect("second watch event should find a match");
    assert_eq!(first.username, "alice@example.com");
    assert_eq!(second.username, "bob@example.com");
    assert!(store.take_one(&key).is_none(), "queue should be drained after two takes");
}

#[test]
fn entries_older_than_the_ttl_are_treated_as_a_miss() {
    let store = CorrelationStore::new(Duration::from_millis(10), 10_000);
    let key = key_for(&configmap("1"), Operation::Delete);
    store.put(key.clone(), ActorIdentity::new("carol@example.com", chrono::Utc::now()));
    std::thread::sleep(Duration::from_millis(30));
    assert!(store.take_one(&key).is_none());
    assert!(store.stats().ttl_evictions >= 1);
}
