//! Embedded key-value persistence for Slotbook.
//!
//! Every persistent concern (credentials, session tokens, scheduled jobs)
//! stores JSON records under composite string keys such as
//! `jobs/id/{id}`. This crate provides:
//!
//! - **`KvStore`**: the storage contract (point reads, writes, prefix scans,
//!   atomic batches and read-then-write updates)
//! - **`SqliteKv`**: the file-backed implementation used in production
//! - **`MemoryKv`**: an in-process implementation for tests

mod error;
mod kv;
mod memory;
mod sqlite;

pub use error::StoreError;
pub use kv::{KvOp, KvRead, KvStore, get_json, put_json};
pub use memory::MemoryKv;
pub use sqlite::SqliteKv;
