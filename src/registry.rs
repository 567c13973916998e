//! The storage manager: a process-level registry of named stores.
//!
//! Deliberately out of the core's scope (see spec §1): this module only
//! implements the collaborator interface the core depends on — naming,
//! lookup, and lifecycle — with no additional behavior of its own.
use std::collections::BTreeMap;
use std::sync::Arc;

use async_lock::RwLock;

use crate::error::{Error, Result};
use crate::store::TransientStore;

/// Registry of named [`TransientStore`]s. Mutations serialize under a
/// single registry lock, per spec §6.
#[derive(Default)]
pub struct StoreRegistry {
    stores: RwLock<BTreeMap<String, Arc<TransientStore>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `store` under `name`. Fails if the name is already taken.
    pub async fn add(&self, name: impl Into<String>, store: Arc<TransientStore>) -> Result<()> {
        let name = name.into();
        let mut guard = self.stores.write().await;
        if guard.contains_key(&name) {
            return Err(Error::StoreAlreadyRegistered(name));
        }
        guard.insert(name, store);
        Ok(())
    }

    /// Unregisters and returns the store named `name`, if any.
    pub async fn remove(&self, name: &str) -> Option<Arc<TransientStore>> {
        self.stores.write().await.remove(name)
    }

    /// Looks up the store named `name`.
    pub async fn get(&self, name: &str) -> Option<Arc<TransientStore>> {
        self.stores.read().await.get(name).cloned()
    }

    /// Lists every registered store name, in sorted order.
    pub async fn list(&self) -> Vec<String> {
        self.stores.read().await.keys().cloned().collect()
    }

    /// Unregisters and clears every store.
    pub async fn close_all(&self) {
        let mut guard = self.stores.write().await;
        let stores: Vec<_> = guard.drain().map(|(_, store)| store).collect();
        drop(guard);
        for store in stores {
            store.clear_store().await;
        }
    }

    /// Handles to every currently-registered store, for the sweeper to
    /// drive on each tick. Not part of spec §6's public registry
    /// interface; an internal detail this crate's driver needs.
    pub(crate) async fn store_handles(&self) -> Vec<Arc<TransientStore>> {
        self.stores.read().await.values().cloned().collect()
    }
}
