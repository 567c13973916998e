//! Integration coverage for the scenarios and invariants in the testable
//! properties section: create/exists, get/put round trips, contention with
//! and without `force`, read-lock replacement, and remove.
use std::sync::Arc;

use bytes::Bytes;
use transtore::{LockMode, PropRequest, PropUpdate, Status, StoreConfig, TransientStore};

fn key(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

// S1: Create/Exists.
#[async_std::test]
async fn create_and_exists() {
    let store = Arc::new(TransientStore::new(3, StoreConfig::default()));
    assert!(store.create(key("k1")).await);
    assert!(!store.create(key("k1")).await);
    let (present, _elapsed) = store.exists(b"k1").await;
    assert!(present);

    let (present, _) = store.exists(b"no-such-key").await;
    assert!(!present);
}

// S2: Get/Put round trip.
#[async_std::test]
async fn get_put_round_trip() {
    let store = Arc::new(TransientStore::new(1, StoreConfig::default()));
    let k = key("k");

    let got = store.get(k.clone(), vec![PropRequest::new(0, LockMode::Update)], 0, false).await;
    assert_eq!(got.status, Status::Ok);
    assert_eq!(got.values[0].value, None);
    let lock_id = got.values[0].lock_id;

    let put = store
        .put(k.clone(), vec![PropUpdate::new(0, lock_id, Some(Bytes::from_static(b"hi")))])
        .await;
    assert_eq!(put.status, Status::Ok);

    let got = store.get(k, vec![PropRequest::new(0, LockMode::Read)], 0, false).await;
    assert_eq!(got.status, Status::Ok);
    assert_eq!(got.values[0].value, Some(Bytes::from_static(b"hi")));
}

// S3: Contention without force times out immediately.
#[async_std::test]
async fn contention_without_force_times_out_immediately() {
    let store = Arc::new(TransientStore::new(1, StoreConfig::default()));
    let k = key("k");

    let held = store.get(k.clone(), vec![PropRequest::new(0, LockMode::Update)], 0, false).await;
    assert_eq!(held.status, Status::Ok);

    let blocked = store.get(k, vec![PropRequest::new(0, LockMode::Update)], 0, false).await;
    assert_eq!(blocked.status, Status::LockWaitTimeOut);
}

// S7 / invariant 7: forced acquisition steals the lock and invalidates the
// prior lock id.
#[async_std::test]
async fn forced_get_invalidates_prior_lock() {
    let store = Arc::new(TransientStore::new(1, StoreConfig::default()));
    let k = key("k");

    let held = store.get(k.clone(), vec![PropRequest::new(0, LockMode::Update)], 0, false).await;
    let held_id = held.values[0].lock_id;

    let forced = store.get(k.clone(), vec![PropRequest::new(0, LockMode::Update)], 0, true).await;
    assert_eq!(forced.status, Status::Ok);
    assert_ne!(forced.values[0].lock_id, held_id);

    let put = store
        .put(k, vec![PropUpdate::new(0, held_id, Some(Bytes::from_static(b"x")))])
        .await;
    assert_eq!(put.status, Status::LockIdMismatch);
}

// Invariant 5: read-lock replacement.
#[async_std::test]
async fn read_lock_replacement() {
    let store = Arc::new(TransientStore::new(1, StoreConfig::default()));
    let k = key("k");

    // seed a value so the prop is assigned
    let got = store.get(k.clone(), vec![PropRequest::new(0, LockMode::Update)], 0, false).await;
    let seed_id = got.values[0].lock_id;
    store
        .put(k.clone(), vec![PropUpdate::new(0, seed_id, Some(Bytes::from_static(b"v")))])
        .await;

    let a = store.get(k.clone(), vec![PropRequest::new(0, LockMode::Read)], 0, false).await;
    let a_id = a.values[0].lock_id;

    // B reads the same property; does not block, and steals the lock
    let b = store.get(k.clone(), vec![PropRequest::new(0, LockMode::Read)], 0, false).await;
    assert_eq!(b.status, Status::Ok);
    assert_ne!(b.values[0].lock_id, a_id);

    // A's clear-only write still succeeds because the current lock is Read
    let cleared = store.put(k.clone(), vec![PropUpdate::new(0, a_id, None)]).await;
    assert_eq!(cleared.status, Status::Ok);

    // but A's value write with the stale id mismatches
    let got = store.get(k.clone(), vec![PropRequest::new(0, LockMode::Read)], 0, false).await;
    let current_id = got.values[0].lock_id;
    let mismatched = store
        .put(k, vec![PropUpdate::new(0, a_id, Some(Bytes::from_static(b"nope")))])
        .await;
    assert_ne!(a_id, current_id);
    assert_eq!(mismatched.status, Status::LockIdMismatch);
}

// S5: Remove returns values and subsequently reports absence.
#[async_std::test]
async fn remove_returns_values_then_absent() {
    let store = Arc::new(TransientStore::new(1, StoreConfig::default()));
    let k = key("k");

    let got = store.get(k.clone(), vec![PropRequest::new(0, LockMode::Update)], 0, false).await;
    let lock_id = got.values[0].lock_id;
    store
        .put(k.clone(), vec![PropUpdate::new(0, lock_id, Some(Bytes::from_static(b"hi")))])
        .await;

    let removed = store.remove(k.clone(), 0, true).await;
    assert_eq!(removed.status, Status::Ok);
    assert_eq!(removed.values.len(), 1);
    assert_eq!(removed.values[0].index, 0);
    assert_eq!(removed.values[0].value, Some(Bytes::from_static(b"hi")));

    let (present, _) = store.exists(b"k").await;
    assert!(!present);
}

#[async_std::test]
async fn remove_absent_key_reports_does_not_exist() {
    let store = Arc::new(TransientStore::new(1, StoreConfig::default()));
    let removed = store.remove(key("missing"), 0, false).await;
    assert_eq!(removed.status, Status::DoesNotExist);
    assert!(removed.values.is_empty());
}

#[async_std::test]
async fn delete_requires_no_active_locks_unless_forced() {
    let store = Arc::new(TransientStore::new(1, StoreConfig::default()));
    let k = key("k");
    store.create(k.clone()).await;

    let held = store.get(k.clone(), vec![PropRequest::new(0, LockMode::Update)], 0, false).await;
    assert_eq!(held.status, Status::Ok);

    let blocked = store.delete(k.clone(), 0, false).await;
    assert_eq!(blocked.status, Status::LockWaitTimeOut);
    assert!(!blocked.deleted);

    let forced = store.delete(k, 0, true).await;
    assert_eq!(forced.status, Status::Ok);
    assert!(forced.deleted);
}

#[async_std::test]
async fn out_of_range_prop_requests_are_silently_skipped() {
    let store = Arc::new(TransientStore::new(1, StoreConfig::default()));
    let got = store.get(key("k"), vec![PropRequest::new(9, LockMode::Update)], 0, false).await;
    assert_eq!(got.status, Status::Ok);
    assert!(got.values.is_empty());
}
