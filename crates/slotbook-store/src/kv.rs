//! The storage contract shared by every backend.

use serde::{Serialize, de::DeserializeOwned};

use crate::StoreError;

/// A single write in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// Insert or overwrite a key.
    Put { key: String, value: Vec<u8> },
    /// Remove a key. Removing an absent key is a no-op.
    Delete { key: String },
}

impl KvOp {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }
}

/// Reads available to the plan of [`KvStore::update`].
pub trait KvRead {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Key-value storage backend.
///
/// Implementations must be safe to share between the scheduler loop and
/// arbitrary caller tasks.
pub trait KvStore: Send + Sync {
    /// Read a single key.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or overwrite a single key.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a single key.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Apply every operation or none of them.
    fn batch(&self, ops: Vec<KvOp>) -> Result<(), StoreError>;

    /// Read, decide and write as one atomic step.
    ///
    /// `plan` sees the store with no concurrent writer in between and
    /// returns the operations to apply. An error from `plan` writes nothing.
    fn update(
        &self,
        plan: &mut dyn FnMut(&dyn KvRead) -> Result<Vec<KvOp>, StoreError>,
    ) -> Result<(), StoreError>;
}

/// Read and decode a JSON record.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON record.
pub fn put_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    store.put(key, &bytes)
}
