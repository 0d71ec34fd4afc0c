//! # Storage Manager
//!
//! Owns the registry of storages, keyed by id and by name, and runs the
//! schema transactions that create and drop them. A storage create/drop is
//! durable the same way record writes are: the operation appends a
//! storage-kind log entry and commits through the schema path, whose apply
//! publishes the new owner id on the storage metadata.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::info;

use crate::config::MAX_RECORD_PAYLOAD;
use crate::engine::Engine;
use crate::error::{Result, XctError};
use crate::log::types;
use crate::storage::{OrderedStorage, StorageId, StorageMeta};
use crate::worker::Worker;

pub struct StorageManager {
    initialized: AtomicBool,
    next_id: AtomicU32,
    by_id: RwLock<HashMap<StorageId, Arc<OrderedStorage>>>,
    by_name: RwLock<HashMap<String, Arc<OrderedStorage>>>,
}

impl StorageManager {
    pub fn new() -> StorageManager {
        StorageManager {
            initialized: AtomicBool::new(false),
            next_id: AtomicU32::new(1),
            by_id: RwLock::new(HashMap::new()),
            by_name: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn initialize(&self) {
        info!("initializing StorageManager");
        self.initialized.store(true, Ordering::Release);
    }

    pub(crate) fn uninitialize(&self) {
        info!("uninitializing StorageManager");
        self.initialized.store(false, Ordering::Release);
    }

    pub fn get_storage(&self, id: StorageId) -> Result<Arc<OrderedStorage>> {
        self.by_id
            .read()
            .get(&id)
            .cloned()
            .ok_or(XctError::StorageNotFound(id))
    }

    pub fn get_storage_by_name(&self, name: &str) -> Option<Arc<OrderedStorage>> {
        self.by_name.read().get(name).cloned()
    }

    pub fn storage_count(&self) -> usize {
        self.by_id.read().len()
    }

    /// Creates a storage through a schema transaction on `worker`.
    pub fn create_storage(
        &self,
        engine: &Arc<Engine>,
        worker: &mut Worker,
        meta: StorageMeta,
    ) -> Result<Arc<OrderedStorage>> {
        if meta.payload_capacity as usize > MAX_RECORD_PAYLOAD {
            return Err(XctError::PayloadTooLarge {
                got: meta.payload_capacity as usize,
                capacity: MAX_RECORD_PAYLOAD,
            });
        }
        if self.get_storage_by_name(&meta.name).is_some() {
            return Err(XctError::KeyAlreadyExists);
        }
        engine.xct_manager().begin_schema_xct(worker)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let storage = OrderedStorage::new(id, meta.clone());
        self.by_id.write().insert(id, Arc::clone(&storage));
        self.by_name
            .write()
            .insert(meta.name.clone(), Arc::clone(&storage));

        let length = types::storage_create_length(meta.name.len());
        let outcome = (|| {
            let buffer = worker.log_buffer_mut();
            let position = buffer.reserve_new_log(length)?;
            let entry = buffer.entry_bytes_mut(position, length);
            types::encode_storage_create(entry, id, &meta.name, meta.payload_capacity);
            engine.xct_manager().precommit_xct(worker)
        })();

        match outcome {
            Ok(epoch) => {
                info!(
                    storage = id,
                    name = %storage.name(),
                    epoch = epoch.value(),
                    "created storage"
                );
                Ok(storage)
            }
            Err(error) => {
                if worker.xct().is_active() {
                    let _ = engine.xct_manager().abort_xct(worker);
                }
                self.by_id.write().remove(&id);
                self.by_name.write().remove(&meta.name);
                Err(error)
            }
        }
    }

    /// Drops a storage through a schema transaction on `worker`.
    pub fn drop_storage(
        &self,
        engine: &Arc<Engine>,
        worker: &mut Worker,
        id: StorageId,
    ) -> Result<()> {
        let storage = self.get_storage(id)?;
        engine.xct_manager().begin_schema_xct(worker)?;

        let outcome = (|| {
            let buffer = worker.log_buffer_mut();
            let position = buffer.reserve_new_log(types::STORAGE_DROP_LENGTH)?;
            let entry = buffer.entry_bytes_mut(position, types::STORAGE_DROP_LENGTH);
            types::encode_storage_drop(entry, id);
            engine.xct_manager().precommit_xct(worker)
        })();
        let epoch = match outcome {
            Ok(epoch) => epoch,
            Err(error) => {
                if worker.xct().is_active() {
                    let _ = engine.xct_manager().abort_xct(worker);
                }
                return Err(error);
            }
        };
        debug_assert!(storage.is_dropped());

        self.by_id.write().remove(&id);
        self.by_name.write().remove(storage.name());
        info!(storage = id, epoch = epoch.value(), "dropped storage");
        Ok(())
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("initialized", &self.is_initialized())
            .field("storages", &self.storage_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_of_unknown_id_errors() {
        let manager = StorageManager::new();
        assert_eq!(
            manager.get_storage(9).unwrap_err(),
            XctError::StorageNotFound(9)
        );
        assert!(manager.get_storage_by_name("nope").is_none());
    }

    #[test]
    fn starts_uninitialized() {
        let manager = StorageManager::new();
        assert!(!manager.is_initialized());
        manager.initialize();
        assert!(manager.is_initialized());
        manager.uninitialize();
        assert!(!manager.is_initialized());
    }
}
