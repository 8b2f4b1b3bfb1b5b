use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::database::{Record, StoreError, SubscriptionStore, Updater};

/// In-process store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<Record>>>, StoreError> {
        self.data
            .read()
            .map_err(|_| StoreError::Lock("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<Record>>>, StoreError> {
        self.data
            .write()
            .map_err(|_| StoreError::Lock("Failed to acquire write lock".to_string()))
    }
}

impl SubscriptionStore for MemoryStore {
    fn has(&self, key: &str) -> bool {
        self.read().map(|data| data.contains_key(key)).unwrap_or(false)
    }

    fn get(&self, key: &str) -> Result<Vec<Record>, StoreError> {
        self.read()?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, value: Vec<Record>) -> Result<(), StoreError> {
        self.write()?.insert(key.to_string(), value);
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: Vec<Record>) -> Result<bool, StoreError> {
        let mut data = self.write()?;
        if data.contains_key(key) {
            return Ok(false);
        }
        data.insert(key.to_string(), value);
        Ok(true)
    }

    fn update_many(&self, updates: Vec<(String, Updater<'_>)>) -> Result<(), StoreError> {
        let mut data = self.write()?;
        // the updater consumes its input, so the live map stays untouched
        // until every update in the batch has succeeded
        let mut staged: HashMap<String, Vec<Record>> = HashMap::with_capacity(updates.len());

        for (key, updater) in updates {
            let current = match staged.remove(&key) {
                Some(value) => value,
                None => data
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(key.clone()))?,
            };
            let updated = updater(current)?;
            staged.insert(key, updated);
        }

        data.extend(staged);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.write()?.remove(key);
        Ok(())
    }
}
