//! In-process store for tests and throwaway runs.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{KvOp, KvRead, KvStore, StoreError};

/// `BTreeMap`-backed store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, index entries included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn batch(&self, ops: Vec<KvOp>) -> Result<(), StoreError> {
        // Holding the write lock for the whole batch makes it atomic to readers.
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        apply(&mut entries, ops);
        Ok(())
    }

    fn update(
        &self,
        plan: &mut dyn FnMut(&dyn KvRead) -> Result<Vec<KvOp>, StoreError>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let ops = plan(&MapRead(&entries))?;
        apply(&mut entries, ops);
        Ok(())
    }
}

struct MapRead<'a>(&'a BTreeMap<String, Vec<u8>>);

impl KvRead for MapRead<'_> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.0.get(key).cloned())
    }
}

fn apply(entries: &mut BTreeMap<String, Vec<u8>>, ops: Vec<KvOp>) {
    for op in ops {
        match op {
            KvOp::Put { key, value } => {
                entries.insert(key, value);
            }
            KvOp::Delete { key } => {
                entries.remove(&key);
            }
        }
    }
}
