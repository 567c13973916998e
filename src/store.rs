//! The concurrent map and the public async operation surface.
//!
//! A [`TransientStore`] owns one entry per key (content-hashed, never
//! content-compared against a different byte sequence colliding on hash —
//! see [`crate::hash`]) plus the two queues that drive expiration and
//! contended retries. Every [`KeyEntry`] is wrapped in its own
//! [`async_lock::Mutex`]; the map itself allows lock-free concurrent
//! reads and atomic insert-if-absent / remove across different keys, so
//! operations against different keys never block one another.
//!
//! Map values are `Arc<Mutex<KeyEntry>>` rather than a bare `Mutex`: every
//! operation clones the handle out of its `DashMap` guard and drops the
//! guard before locking or awaiting anything, so this store never holds a
//! `DashMap` shard lock across an `.await` point. Within a single key, every
//! check-then-act decision (is it blocked? is it tombstoned?) is made and
//! acted upon under one `Mutex` acquisition, never two, so no other task can
//! observe or change lock state in the gap between the check and the act.
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{bounded, Sender};
use async_lock::{Mutex, RwLock};
use bytes::Bytes;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use log::{debug, trace};

use crate::config::StoreConfig;
use crate::entry::{KeyEntry, PropEntry, PropRequest, PropUpdate};
use crate::error::Status;
use crate::hash::FnvMixBuildHasher;
use crate::queue::{LockWaitQueue, RetryThunk, TimeoutQueue};

/// Monotonic millisecond tick shared by every store in the process.
///
/// Stored as `u32`, which wraps roughly every 49 days; every comparison
/// against it (see [`crate::entry::PropLock::expired`]) uses wrapping
/// subtraction so a rollover never reads back as a spurious huge elapsed
/// time.
pub fn now_tick() -> u32 {
    static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u32
}

type Slot = Arc<Mutex<KeyEntry>>;
type EntryMap = DashMap<Bytes, Slot, FnvMixBuildHasher>;

/// Outcome of [`TransientStore::get`].
#[derive(Debug, Clone)]
pub struct GetResult {
    pub status: Status,
    pub values: Vec<PropEntry>,
}

/// Outcome of [`TransientStore::put`].
#[derive(Debug, Clone, Copy)]
pub struct PutResult {
    pub status: Status,
}

/// Outcome of [`TransientStore::delete`].
#[derive(Debug, Clone, Copy)]
pub struct DeleteResult {
    pub status: Status,
    pub deleted: bool,
}

/// Outcome of [`TransientStore::remove`].
#[derive(Debug, Clone)]
pub struct RemoveResult {
    pub status: Status,
    pub values: Vec<PropEntry>,
}

/// Result of deciding, under a single entry-mutex acquisition, whether a
/// delete may proceed.
enum DeleteOutcome {
    /// The entry was already tombstoned (or never existed).
    Absent,
    /// The entry had no blocking locks (or `force` was set); it has been
    /// tombstoned under the guard that made this decision.
    Deleted,
    /// The entry has at least one property blocking, and `force` was not
    /// set: nothing was changed.
    Blocked,
}

/// Same as [`DeleteOutcome`], but `Deleted` carries the property snapshot
/// taken at the moment of tombstoning, for `Remove`.
enum RemoveOutcome {
    Absent,
    Removed(Vec<PropEntry>),
    Blocked,
}

/// Decides and, if possible, commits a delete in one critical section.
///
/// `count_all_locked` is computed and `set_deleted` is invoked under the
/// same guard, so no concurrent operation can observe a "not blocked"
/// verdict that a lock acquired in some gap would have invalidated.
async fn try_tombstone(slot: &Slot, lock_span: Duration, now: u32, force: bool) -> DeleteOutcome {
    let mut entry = slot.lock().await;
    if entry.is_tombstoned() {
        return DeleteOutcome::Absent;
    }
    if !force && entry.count_all_locked(lock_span, now) > 0 {
        return DeleteOutcome::Blocked;
    }
    entry.set_deleted();
    DeleteOutcome::Deleted
}

/// Same critical section as [`try_tombstone`], but snapshots every
/// assigned property before tombstoning, for `Remove`.
async fn try_tombstone_and_collect(slot: &Slot, lock_span: Duration, now: u32, force: bool) -> RemoveOutcome {
    let mut entry = slot.lock().await;
    if entry.is_tombstoned() {
        return RemoveOutcome::Absent;
    }
    if !force && entry.count_all_locked(lock_span, now) > 0 {
        return RemoveOutcome::Blocked;
    }
    let values = entry.get_all();
    entry.set_deleted();
    RemoveOutcome::Removed(values)
}

/// The in-memory, key-value transient property store.
///
/// Every public operation is `async`, but per the concurrency model only
/// [`TransientStore::get`], [`TransientStore::delete`] and
/// [`TransientStore::remove`] ever truly suspend: on contention they park a
/// retry on the [`LockWaitQueue`] and await a completion handle that the
/// sweeper resolves on a later tick (see [`crate::sweeper`]). Everything
/// else finishes synchronously under the entry's mutex before returning.
pub struct TransientStore {
    map: EntryMap,
    config: RwLock<StoreConfig>,
    next_lock_id: AtomicI32,
    timeout_queue: TimeoutQueue,
    lock_wait_queue: LockWaitQueue,
    label: String,
    prop_count: usize,
}

impl TransientStore {
    /// Builds a store with `prop_count` properties per key.
    pub fn new(prop_count: usize, config: StoreConfig) -> Self {
        Self {
            map: DashMap::with_hasher(FnvMixBuildHasher::default()),
            config: RwLock::new(config),
            next_lock_id: AtomicI32::new(1),
            timeout_queue: TimeoutQueue::new(),
            lock_wait_queue: LockWaitQueue::new(),
            label: String::new(),
            prop_count,
        }
    }

    /// Sets the label used in log output, matching the teacher's
    /// `Cache::with_label` convention.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = format!("store({}): ", label);
        self
    }

    /// Number of live (non-tombstoned) keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub async fn config(&self) -> StoreConfig {
        *self.config.read().await
    }

    pub async fn set_timeout(&self, timeout_secs: u64) -> crate::error::Result<()> {
        self.config.write().await.set_timeout(timeout_secs)
    }

    pub async fn set_lock_timeout(&self, lock_timeout_secs: u64) -> crate::error::Result<()> {
        self.config.write().await.set_lock_timeout(lock_timeout_secs)
    }

    fn next_lock_id(&self) -> i32 {
        self.next_lock_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the slot for `key`, creating it if absent. Reports whether
    /// the slot was newly created so the caller can decide whether to
    /// enqueue a fresh timeout record.
    fn get_or_insert_slot(&self, key: &Bytes, now: u32) -> (Slot, bool) {
        match self.map.entry(key.clone()) {
            MapEntry::Occupied(o) => (o.get().clone(), false),
            MapEntry::Vacant(v) => {
                let slot: Slot = Arc::new(Mutex::new(KeyEntry::new(key.clone(), self.prop_count, now)));
                v.insert(slot.clone());
                (slot, true)
            }
        }
    }

    /// Clones the slot for `key`, if present.
    fn get_slot(&self, key: &[u8]) -> Option<Slot> {
        self.map.get(key).map(|guard| guard.clone())
    }

    /// Best-effort insert-if-absent. Property indexes are not validated.
    pub async fn create(&self, key: Bytes) -> bool {
        let now = now_tick();
        let (_, inserted) = self.get_or_insert_slot(&key, now);
        if inserted {
            self.timeout_queue.push(key, now).await;
            trace!("{}created key", self.label);
        }
        inserted
    }

    /// Reports whether `key` is present and, if so, the number of whole
    /// seconds elapsed since it was last touched (not time remaining until
    /// expiry — preserved misnomer, see the design notes).
    pub async fn exists(&self, key: &[u8]) -> (bool, u64) {
        let slot = match self.get_slot(key) {
            Some(slot) => slot,
            None => return (false, 0),
        };
        let entry = slot.lock().await;
        if entry.is_tombstoned() {
            return (false, 0);
        }
        let now = now_tick();
        let elapsed_ms = now.wrapping_sub(entry.timestamp);
        (true, (elapsed_ms as u64) / 1000)
    }

    /// Acquires locks on `requests` against `key`, creating the entry if it
    /// does not yet exist. On contention, parks a retry unless `force` is
    /// set or `max_wait_secs` has already elapsed.
    pub async fn get(
        self: &Arc<Self>,
        key: Bytes,
        requests: Vec<PropRequest>,
        max_wait_secs: u64,
        force: bool,
    ) -> GetResult {
        let started = Instant::now();
        let (tx, rx) = bounded(1);
        self.clone().get_inner(key, requests, max_wait_secs, force, started, tx).await;
        rx.recv().await.unwrap_or(GetResult {
            status: Status::General,
            values: Vec::new(),
        })
    }

    async fn get_inner(
        self: Arc<Self>,
        key: Bytes,
        requests: Vec<PropRequest>,
        max_wait_secs: u64,
        force: bool,
        started: Instant,
        tx: Sender<GetResult>,
    ) {
        let now = now_tick();
        let (slot, inserted) = self.get_or_insert_slot(&key, now);
        if inserted {
            self.timeout_queue.push(key.clone(), now).await;
        }

        let config = self.config().await;

        // Count-then-acquire happens under one guard: a concurrent get/put/
        // delete on the same key cannot install or observe a lock between
        // the count and the acquisition, since both happen while this guard
        // is held.
        let acquired = {
            let mut entry = slot.lock().await;
            let blocked = entry.count_locked(&requests, config.lock_timeout(), now);
            if blocked == 0 {
                Some(entry.lock_and_get(&requests, self.next_lock_id(), now_tick()))
            } else {
                None
            }
        };

        if let Some(values) = acquired {
            let _ = tx.send(GetResult { status: Status::Ok, values }).await;
            return;
        }

        let elapsed = started.elapsed();
        let max_wait = Duration::from_secs(max_wait_secs);
        if max_wait_secs == 0 || elapsed >= max_wait {
            if force {
                let values = {
                    let mut entry = slot.lock().await;
                    entry.lock_and_get(&requests, self.next_lock_id(), now_tick())
                };
                debug!("{}forced acquisition on {} after contention", self.label, hex(&key));
                let _ = tx.send(GetResult { status: Status::Ok, values }).await;
            } else {
                let _ = tx
                    .send(GetResult {
                        status: Status::LockWaitTimeOut,
                        values: Vec::new(),
                    })
                    .await;
            }
            return;
        }

        trace!("{}parking get on {}", self.label, hex(&key));
        let store = self.clone();
        let thunk: RetryThunk = Box::new(move || {
            Box::pin(async move {
                store.get_inner(key, requests, max_wait_secs, force, started, tx).await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        self.lock_wait_queue.push(thunk).await;
    }

    /// Writes `updates` against `key`. Restarts the entry's timeout
    /// regardless of whether the per-property writes succeed; this is
    /// deliberate (see the design notes on `Put`'s ordering).
    pub async fn put(&self, key: Bytes, updates: Vec<PropUpdate>) -> PutResult {
        let slot = match self.get_slot(&key) {
            Some(slot) => slot,
            None => return PutResult { status: Status::DoesNotExist },
        };
        let now = now_tick();
        let mut entry = slot.lock().await;
        entry.timestamp = now;
        self.timeout_queue.push(key, now).await;
        let status = match entry.set(&updates) {
            Ok(()) => Status::Ok,
            Err(code) => Status::from(code),
        };
        PutResult { status }
    }

    /// Tombstones and removes `key` if no property is currently locked.
    pub async fn delete(self: &Arc<Self>, key: Bytes, max_wait_secs: u64, force: bool) -> DeleteResult {
        let started = Instant::now();
        let (tx, rx) = bounded(1);
        self.clone().delete_inner(key, max_wait_secs, force, started, tx).await;
        rx.recv().await.unwrap_or(DeleteResult {
            status: Status::General,
            deleted: false,
        })
    }

    async fn delete_inner(
        self: Arc<Self>,
        key: Bytes,
        max_wait_secs: u64,
        force: bool,
        started: Instant,
        tx: Sender<DeleteResult>,
    ) {
        let slot = match self.get_slot(&key) {
            Some(slot) => slot,
            None => {
                let _ = tx
                    .send(DeleteResult {
                        status: Status::DoesNotExist,
                        deleted: false,
                    })
                    .await;
                return;
            }
        };

        let config = self.config().await;
        let now = now_tick();
        let outcome = try_tombstone(&slot, config.lock_timeout(), now, false).await;
        if !matches!(outcome, DeleteOutcome::Blocked) {
            self.finish_delete(&key, outcome, tx).await;
            return;
        }

        let elapsed = started.elapsed();
        let max_wait = Duration::from_secs(max_wait_secs);
        if max_wait_secs == 0 || elapsed >= max_wait {
            if force {
                let outcome = try_tombstone(&slot, config.lock_timeout(), now_tick(), true).await;
                self.finish_delete(&key, outcome, tx).await;
            } else {
                let _ = tx
                    .send(DeleteResult {
                        status: Status::LockWaitTimeOut,
                        deleted: false,
                    })
                    .await;
            }
            return;
        }

        trace!("{}parking delete on {}", self.label, hex(&key));
        let store = self.clone();
        let thunk: RetryThunk = Box::new(move || {
            Box::pin(async move {
                store.delete_inner(key, max_wait_secs, force, started, tx).await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        self.lock_wait_queue.push(thunk).await;
    }

    /// Commits a [`DeleteOutcome`] already decided under the entry's guard:
    /// drops the map entry if it was tombstoned, and replies.
    async fn finish_delete(&self, key: &Bytes, outcome: DeleteOutcome, tx: Sender<DeleteResult>) {
        match outcome {
            DeleteOutcome::Deleted => {
                self.map.remove(key);
                let _ = tx.send(DeleteResult { status: Status::Ok, deleted: true }).await;
            }
            DeleteOutcome::Absent => {
                let _ = tx
                    .send(DeleteResult {
                        status: Status::DoesNotExist,
                        deleted: false,
                    })
                    .await;
            }
            DeleteOutcome::Blocked => unreachable!("caller only reaches finish_delete once unblocked"),
        }
    }

    /// Same contention protocol as [`TransientStore::delete`], but returns
    /// every currently-assigned property value before the entry is removed.
    pub async fn remove(self: &Arc<Self>, key: Bytes, max_wait_secs: u64, force: bool) -> RemoveResult {
        let started = Instant::now();
        let (tx, rx) = bounded(1);
        self.clone().remove_inner(key, max_wait_secs, force, started, tx).await;
        rx.recv().await.unwrap_or(RemoveResult {
            status: Status::General,
            values: Vec::new(),
        })
    }

    async fn remove_inner(
        self: Arc<Self>,
        key: Bytes,
        max_wait_secs: u64,
        force: bool,
        started: Instant,
        tx: Sender<RemoveResult>,
    ) {
        let slot = match self.get_slot(&key) {
            Some(slot) => slot,
            None => {
                let _ = tx
                    .send(RemoveResult {
                        status: Status::DoesNotExist,
                        values: Vec::new(),
                    })
                    .await;
                return;
            }
        };

        let config = self.config().await;
        let now = now_tick();
        let outcome = try_tombstone_and_collect(&slot, config.lock_timeout(), now, false).await;
        if !matches!(outcome, RemoveOutcome::Blocked) {
            self.finish_remove(&key, outcome, tx).await;
            return;
        }

        let elapsed = started.elapsed();
        let max_wait = Duration::from_secs(max_wait_secs);
        if max_wait_secs == 0 || elapsed >= max_wait {
            if force {
                let outcome = try_tombstone_and_collect(&slot, config.lock_timeout(), now_tick(), true).await;
                self.finish_remove(&key, outcome, tx).await;
            } else {
                let _ = tx
                    .send(RemoveResult {
                        status: Status::LockWaitTimeOut,
                        values: Vec::new(),
                    })
                    .await;
            }
            return;
        }

        trace!("{}parking remove on {}", self.label, hex(&key));
        let store = self.clone();
        let thunk: RetryThunk = Box::new(move || {
            Box::pin(async move {
                store.remove_inner(key, max_wait_secs, force, started, tx).await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        self.lock_wait_queue.push(thunk).await;
    }

    /// Commits a [`RemoveOutcome`] already decided under the entry's guard.
    async fn finish_remove(&self, key: &Bytes, outcome: RemoveOutcome, tx: Sender<RemoveResult>) {
        match outcome {
            RemoveOutcome::Removed(values) => {
                self.map.remove(key);
                let _ = tx.send(RemoveResult { status: Status::Ok, values }).await;
            }
            RemoveOutcome::Absent => {
                let _ = tx
                    .send(RemoveResult {
                        status: Status::DoesNotExist,
                        values: Vec::new(),
                    })
                    .await;
            }
            RemoveOutcome::Blocked => unreachable!("caller only reaches finish_remove once unblocked"),
        }
    }

    /// Drains the map and both queues, ignoring any currently-held locks.
    pub async fn clear_store(&self) {
        self.map.clear();
        self.timeout_queue.clear().await;
        self.lock_wait_queue.clear().await;
        debug!("{}cleared store", self.label);
    }

    /// Unregisters this store from `registry` and clears it.
    pub async fn remove_store(&self, registry: &crate::registry::StoreRegistry, name: &str) {
        registry.remove(name).await;
        self.clear_store().await;
    }

    /// Drains the head of the timeout queue, removing every entry whose
    /// timeout record is still authoritative (see the design notes on the
    /// double-check against a stale record).
    ///
    /// A record whose entry cannot be locked right now (held by some other
    /// in-flight operation) is re-enqueued with its original timestamp
    /// rather than dropped, so a contended entry is reconsidered on a later
    /// tick instead of losing its only timeout record outright. The tick
    /// then stops rather than spinning on that same record.
    pub(crate) async fn process_timeouts(&self) {
        let timeout = self.config().await.timeout();
        loop {
            let head_ts = match self.timeout_queue.peek_front_timestamp().await {
                Some(ts) => ts,
                None => break,
            };
            let now = now_tick();
            let elapsed_ms = now.wrapping_sub(head_ts);
            if Duration::from_millis(elapsed_ms as u64) < timeout {
                break;
            }
            let record = match self.timeout_queue.pop_front().await {
                Some(r) => r,
                None => break,
            };

            let slot = match self.get_slot(&record.key) {
                Some(slot) => slot,
                None => continue, // already removed; record has no entry left to sweep
            };

            match slot.try_lock() {
                Some(entry) => {
                    let matches = entry.timestamp == record.timestamp && !entry.is_tombstoned();
                    drop(entry);
                    if matches {
                        self.map.remove(&record.key);
                        trace!("{}swept expired key", self.label);
                    }
                }
                None => {
                    // Entry is momentarily held by another operation; its
                    // timeout cannot be decided right now. Re-push rather
                    // than drop, so this key is reconsidered later instead
                    // of never being swept again, then stop this tick to
                    // avoid spinning on a record that may stay contended
                    // for the rest of the tick.
                    self.timeout_queue.push(record.key.clone(), record.timestamp).await;
                    trace!("{}deferred sweep on contended key", self.label);
                    break;
                }
            }
        }
    }

    /// Invokes every currently-parked retry, in enqueue order.
    pub(crate) async fn process_lock_wait_queue(&self) {
        let retries = self.lock_wait_queue.drain().await;
        if retries.is_empty() {
            return;
        }
        trace!(
            "{}replaying {} parked retr{}",
            self.label,
            retries.len(),
            if retries.len() == 1 { "y" } else { "ies" }
        );
        for retry in retries {
            (retry)().await;
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
