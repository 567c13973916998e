//! An in-memory, key-value transient property store.
//!
//! Each key maps to a fixed-width record of named, independently-lockable
//! "properties". A client acquires a lock on one or more properties,
//! optionally reads their current values, later writes new values (or
//! clears the lock) under the same lock identity, and ultimately allows
//! the entry to expire or removes it explicitly.
//!
//! The store is not durable and does not order writes across keys; see
//! [`TransientStore`] for the full operation surface.
pub mod config;
pub mod entry;
pub mod error;
pub mod hash;
pub mod queue;
pub mod registry;
pub mod store;
pub mod sweeper;

// lifted types to the top level
pub use crate::config::{ManagerConfig, StoreConfig};
pub use crate::entry::{KeyEntry, LockMode, Prop, PropEntry, PropLock, PropRequest, PropUpdate};
pub use crate::error::{Error, ErrorCode, Result, Status};
pub use crate::registry::StoreRegistry;
pub use crate::store::{DeleteResult, GetResult, PutResult, RemoveResult, TransientStore};
pub use crate::sweeper::{MemoryProbe, Sweeper, SysinfoProbe};
