//! Error taxonomy for the store.
//!
//! `ErrorCode` mirrors the wire-stable ordinals used to report per-property
//! lock failures from [`crate::entry::KeyEntry::set`]. `Locked` is produced
//! internally while deciding whether to park a retry and must never reach a
//! caller; public operations surface it through [`Status`] instead, whose
//! variants are exactly the subset of `ErrorCode` that may legitimately be
//! observed by a client, plus the successful `Ok` case.
//!
//! `Error` covers the handful of genuinely exceptional conditions in this
//! crate: rejected configuration and registry bookkeeping failures.
use thiserror::Error as ThisError;

/// Per-property-lock failure codes, wire-stable ordinals per the original
/// store's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum ErrorCode {
    #[error("general error")]
    General = 1,
    #[error("key does not exist")]
    DoesNotExist = 2,
    #[error("key already exists")]
    AlreadyExists = 3,
    #[error("capacity exceeded")]
    CapacityExceeded = 4,
    #[error("timed out waiting for a contended lock")]
    LockWaitTimeOut = 5,
    #[error("lock held is not valid for this operation")]
    InvalidLock = 6,
    #[error("supplied lock id does not match the current lock")]
    LockIdMismatch = 7,
    /// Contention signal used internally by [`crate::entry::KeyEntry`] and
    /// [`crate::store::TransientStore`]; never returned from a public
    /// operation.
    #[error("property is currently locked")]
    Locked = 8,
    #[error("property is not currently locked")]
    NotLocked = 9,
}

/// Outcome of a public store operation.
///
/// This is the client-visible status reported alongside a
/// [`crate::store::GetResult`], [`crate::store::PutResult`],
/// [`crate::store::DeleteResult`] or [`crate::store::RemoveResult`]. It
/// never contains [`ErrorCode::Locked`]: a contended call either resolves
/// once the contention clears, or yields `LockWaitTimeOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation completed as requested.
    Ok,
    General,
    DoesNotExist,
    AlreadyExists,
    CapacityExceeded,
    LockWaitTimeOut,
    InvalidLock,
    LockIdMismatch,
    NotLocked,
}

impl From<ErrorCode> for Status {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::General => Status::General,
            ErrorCode::DoesNotExist => Status::DoesNotExist,
            ErrorCode::AlreadyExists => Status::AlreadyExists,
            ErrorCode::CapacityExceeded => Status::CapacityExceeded,
            ErrorCode::LockWaitTimeOut => Status::LockWaitTimeOut,
            ErrorCode::InvalidLock => Status::InvalidLock,
            ErrorCode::LockIdMismatch => Status::LockIdMismatch,
            ErrorCode::NotLocked => Status::NotLocked,
            ErrorCode::Locked => {
                debug_assert!(false, "Locked must never be surfaced to a caller");
                Status::LockWaitTimeOut
            }
        }
    }
}

/// Crate-level error for configuration and registry failures.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid store configuration: timeout must be at least 2x lock_timeout")]
    InvalidConfig,
    #[error("store '{0}' is not registered")]
    StoreNotFound(String),
    #[error("store '{0}' is already registered")]
    StoreAlreadyRegistered(String),
}

pub type Result<T> = std::result::Result<T, Error>;
