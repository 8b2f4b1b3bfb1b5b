//! Subscription storage.
//!
//! A [`SubscriptionStore`] maps an address to its append-only log of encoded
//! transaction records. Both backends guard their whole keyspace with a single
//! lock: every mutation is linearized, which is correct for any number of
//! subscribers but caps write throughput. A sharded backend only has to keep
//! `update` atomic per key to be a drop-in replacement.

pub mod codec;
pub mod memory;
pub mod schema;
pub mod sqlite;


use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
pub use crate::error::StoreError;

pub use codec::{append_records, decode_transactions, encode_transactions};
pub use memory::MemoryStore;
pub use schema::{initialize_schema, run_migrations};
pub use sqlite::SqliteStore;

/// One serialized transaction
pub type Record = Vec<u8>;

/// Read-modify-write step applied by [`SubscriptionStore::update`] and
/// [`SubscriptionStore::update_many`]
pub type Updater<'a> = Box<dyn FnOnce(Vec<Record>) -> Result<Vec<Record>, StoreError> + Send + 'a>;

pub trait SubscriptionStore: Send + Sync {
    /// Whether the key exists
    fn has(&self, key: &str) -> bool;

    /// The full log for `key`, or `StoreError::NotFound`
    fn get(&self, key: &str) -> Result<Vec<Record>, StoreError>;

    /// Unconditional overwrite
    fn put(&self, key: &str, value: Vec<Record>) -> Result<(), StoreError>;

    /// Insert only when `key` is absent. Returns whether the insert happened.
    ///
    /// The default is not atomic; backends override it under their lock.
    fn put_if_absent(&self, key: &str, value: Vec<Record>) -> Result<bool, StoreError> {
        if self.has(key) {
            return Ok(false);
        }
        self.put(key, value)?;
        Ok(true)
    }

    /// Atomic read-modify-write. No other operation on `key` observes the
    /// intermediate state. Fails with `NotFound` if the key is absent, or with
    /// whatever the updater returns, in which case nothing is written.
    fn update(&self, key: &str, updater: Updater<'_>) -> Result<(), StoreError> {
        self.update_many(vec![(key.to_string(), updater)])
    }

    /// Apply several updates as one unit: every key is written or none is.
    ///
    /// Updates run in order, so a key listed twice sees its earlier update.
    /// The first `NotFound` or updater error aborts the whole batch.
    fn update_many(&self, updates: Vec<(String, Updater<'_>)>) -> Result<(), StoreError>;

    /// Snapshot of all keys
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Remove `key`; absent keys are not an error
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Open the backend selected by configuration
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn SubscriptionStore>, StoreError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Sqlite => Ok(Arc::new(SqliteStore::new(&config.path)?)),
    }
}
