//! Per-key record structures: lock state machine, property slots, and the
//! fixed-width record that is the unit of mutual exclusion in the store.
//!
//! Everything in this module is pure, synchronous state manipulation; the
//! asynchronous exclusion and orchestration live in [`crate::store`]. A
//! [`KeyEntry`] is only ever mutated while its caller holds the per-entry
//! mutex the store wraps it in, so none of the methods here need interior
//! synchronization of their own.
use std::time::Duration;

use bytes::Bytes;

use crate::error::ErrorCode;

/// A property lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// No lock is held; the property is open.
    #[default]
    None,
    /// Exclusive lock that suppresses the returned value.
    Create,
    /// Shared lock; a second `Read` request replaces rather than blocks.
    Read,
    /// Exclusive lock.
    Update,
}

/// A lock record held (or once held) against a [`Prop`].
///
/// `PropLock` is a small value type: cheap to copy, cheap to compare.
/// `timestamp` is a 32-bit monotonic millisecond tick (see
/// [`crate::store::now_tick`]); comparisons account for its wraparound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropLock {
    pub id: i32,
    pub mode: LockMode,
    pub timestamp: u32,
}

impl PropLock {
    pub fn new(id: i32, mode: LockMode, timestamp: u32) -> Self {
        Self { id, mode, timestamp }
    }

    /// Whether this lock is older than `span`, measured from `now`.
    ///
    /// Uses a wrapping difference so a 32-bit tick rollover does not read
    /// as a spuriously huge elapsed time.
    pub fn expired(&self, span: Duration, now: u32) -> bool {
        let elapsed = now.wrapping_sub(self.timestamp) as i32 as i64;
        let span_ms = span.as_millis().min(i64::MAX as u128) as i64;
        elapsed > span_ms
    }
}

/// The three observable states of a property's value slot.
///
/// `Unassigned` and `Empty` are kept distinct so that lock identity survives
/// a property's first write: acquiring a lock on a never-written property
/// moves it to `Empty`, which is visible to [`KeyEntry::get_all`] even
/// before any value has actually been stored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropValue {
    /// Never written and never locked.
    #[default]
    Unassigned,
    /// Locked (or once locked) but no value has been stored yet.
    Empty,
    /// Holds a value; may be a zero-length byte sequence.
    Value(Bytes),
}

impl PropValue {
    fn is_assigned(&self) -> bool {
        !matches!(self, PropValue::Unassigned)
    }

    fn as_bytes(&self) -> Option<Bytes> {
        match self {
            PropValue::Value(b) => Some(b.clone()),
            _ => None,
        }
    }
}

/// One slot in a key's record: its current lock and current value.
#[derive(Debug, Clone, Default)]
pub struct Prop {
    pub lock: PropLock,
    pub value: PropValue,
}

impl Prop {
    /// Whether this property is currently considered locked for blocking
    /// purposes: unassigned properties are never locked, an open lock
    /// (`LockMode::None`) is never locked, and an expired lock is treated
    /// as absent even though its id is preserved.
    pub fn is_locked(&self, lock_span: Duration, now: u32) -> bool {
        if !self.value.is_assigned() {
            return false;
        }
        if self.lock.mode == LockMode::None {
            return false;
        }
        !self.lock.expired(lock_span, now)
    }

    /// Whether a request for `requested` mode blocks against this property's
    /// current lock state, per the compatibility table in the lock state
    /// machine design: a `Read` request against a held `Read` lock never
    /// blocks (it replaces the existing lock instead).
    pub fn blocks(&self, requested: LockMode, lock_span: Duration, now: u32) -> bool {
        if !self.is_locked(lock_span, now) {
            return false;
        }
        !(self.lock.mode == LockMode::Read && requested == LockMode::Read)
    }
}

/// A request to acquire a lock on a single property, by index.
#[derive(Debug, Clone, Copy)]
pub struct PropRequest {
    pub index: usize,
    pub mode: LockMode,
}

impl PropRequest {
    pub fn new(index: usize, mode: LockMode) -> Self {
        Self { index, mode }
    }
}

/// One property's lock id and value, as returned by a read operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropEntry {
    pub index: usize,
    pub lock_id: i32,
    pub value: Option<Bytes>,
}

/// A write to a single property, by index, presented to [`KeyEntry::set`].
///
/// `value = None` is a clear-only write: it opens the lock without storing
/// anything. `value = Some(bytes)` stores `bytes` (which may be empty) and
/// then opens the lock.
#[derive(Debug, Clone)]
pub struct PropUpdate {
    pub index: usize,
    pub lock_id: i32,
    pub value: Option<Bytes>,
}

impl PropUpdate {
    pub fn new(index: usize, lock_id: i32, value: Option<Bytes>) -> Self {
        Self { index, lock_id, value }
    }
}

/// A fixed-size record of properties for one key.
///
/// `props.len()` is fixed at construction and equal to the enclosing
/// store's descriptor count for the lifetime of the entry. `key = None`
/// marks the entry tombstoned: it must not remain reachable from the store
/// map once tombstoned.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub key: Option<Bytes>,
    pub props: Vec<Prop>,
    pub timestamp: u32,
}

impl KeyEntry {
    pub fn new(key: Bytes, prop_count: usize, timestamp: u32) -> Self {
        Self {
            key: Some(key),
            props: vec![Prop::default(); prop_count],
            timestamp,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.key.is_none()
    }

    /// Counts how many of `requests` currently block against this entry.
    /// Requests whose index is out of range are silently skipped.
    pub fn count_locked(&self, requests: &[PropRequest], lock_span: Duration, now: u32) -> usize {
        requests
            .iter()
            .filter(|r| {
                self.props
                    .get(r.index)
                    .is_some_and(|p| p.blocks(r.mode, lock_span, now))
            })
            .count()
    }

    /// Counts all currently-blocking properties, with no request filter.
    pub fn count_all_locked(&self, lock_span: Duration, now: u32) -> usize {
        self.props
            .iter()
            .filter(|p| p.is_locked(lock_span, now))
            .count()
    }

    /// Installs a fresh lock for each in-range request and returns the
    /// resulting `PropEntry`s, in request order. A never-written property
    /// transitions to `Empty` on lock acquisition. `Create` requests never
    /// return the current value, matching the "do not leak the value to a
    /// creator" rule.
    pub fn lock_and_get(&mut self, requests: &[PropRequest], lock_id: i32, now: u32) -> Vec<PropEntry> {
        let mut out = Vec::with_capacity(requests.len());
        for req in requests {
            if let Some(prop) = self.props.get_mut(req.index) {
                prop.lock = PropLock::new(lock_id, req.mode, now);
                if !prop.value.is_assigned() {
                    prop.value = PropValue::Empty;
                }
                let value = match req.mode {
                    LockMode::Create => None,
                    _ => prop.value.as_bytes(),
                };
                out.push(PropEntry { index: req.index, lock_id, value });
            }
        }
        out
    }

    /// Emits one `PropEntry` per assigned property, regardless of lock
    /// state, in ascending index order.
    pub fn get_all(&self) -> Vec<PropEntry> {
        self.props
            .iter()
            .enumerate()
            .filter(|(_, p)| p.value.is_assigned())
            .map(|(index, p)| PropEntry {
                index,
                lock_id: p.lock.id,
                value: p.value.as_bytes(),
            })
            .collect()
    }

    /// Applies a batch of writes, stopping at (and returning) the first
    /// failure. Updates that succeeded before the failing one are retained.
    pub fn set(&mut self, updates: &[PropUpdate]) -> Result<(), ErrorCode> {
        for update in updates {
            let prop = match self.props.get_mut(update.index) {
                Some(p) => p,
                None => return Err(ErrorCode::NotLocked),
            };
            match &update.value {
                Some(value) => {
                    if !prop.value.is_assigned() || prop.lock.mode == LockMode::None {
                        return Err(ErrorCode::NotLocked);
                    }
                    if prop.lock.id != update.lock_id {
                        return Err(ErrorCode::LockIdMismatch);
                    }
                    if prop.lock.mode == LockMode::Read {
                        return Err(ErrorCode::InvalidLock);
                    }
                    prop.value = PropValue::Value(value.clone());
                }
                None => {
                    let read_held = prop.lock.mode == LockMode::Read;
                    if prop.lock.id != update.lock_id && !read_held {
                        return Err(ErrorCode::LockIdMismatch);
                    }
                }
            }
            prop.lock.mode = LockMode::None;
        }
        Ok(())
    }

    /// Tombstones this entry. Idempotent.
    pub fn set_deleted(&mut self) {
        self.key = None;
    }
}
