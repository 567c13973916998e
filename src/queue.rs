//! The two FIFOs the sweeper drains on each tick: expiring entries and
//! parked lock-wait retries.
use std::collections::VecDeque;
use std::pin::Pin;

use async_lock::Mutex;
use bytes::Bytes;
use futures_lite::future::Future;

/// A pending expiration check for one key, enqueued whenever that key's
/// entry is touched (created or `Put`). `timestamp` mirrors the entry's own
/// timestamp at the moment this record was enqueued, which is what lets the
/// sweeper tell a stale record apart from the entry's authoritative one.
#[derive(Debug, Clone)]
pub(crate) struct TimeoutRecord {
    pub key: Bytes,
    pub timestamp: u32,
}

/// FIFO of timeout records, drained head-first by
/// `crate::sweeper::process_timeouts`.
#[derive(Default)]
pub(crate) struct TimeoutQueue {
    records: Mutex<VecDeque<TimeoutRecord>>,
}

impl TimeoutQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, key: Bytes, timestamp: u32) {
        self.records.lock().await.push_back(TimeoutRecord { key, timestamp });
    }

    pub async fn peek_front_timestamp(&self) -> Option<u32> {
        self.records.lock().await.front().map(|r| r.timestamp)
    }

    pub async fn pop_front(&self) -> Option<TimeoutRecord> {
        self.records.lock().await.pop_front()
    }

    pub async fn clear(&self) {
        self.records.lock().await.clear();
    }
}

/// A parked retry: a thunk that, once invoked, produces the boxed future
/// re-entering the originating operation from the top.
pub(crate) type RetryThunk = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// FIFO of parked retries, replayed in enqueue order on each sweeper tick by
/// `crate::sweeper::process_lock_wait_queue`. A fresh request arriving
/// between ticks is not held back by anything parked here, so FIFO order is
/// a property of replay, not a fairness guarantee.
#[derive(Default)]
pub(crate) struct LockWaitQueue {
    retries: Mutex<VecDeque<RetryThunk>>,
}

impl LockWaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, thunk: RetryThunk) {
        self.retries.lock().await.push_back(thunk);
    }

    /// Removes and returns every currently parked retry, in enqueue order.
    pub async fn drain(&self) -> Vec<RetryThunk> {
        self.retries.lock().await.drain(..).collect()
    }

    pub async fn clear(&self) {
        self.retries.lock().await.clear();
    }
}
