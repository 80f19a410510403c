//! Storage module for the document store
//!
//! This module contains the ordered key-value store (a B-tree that can spill
//! values to a secondary store) and the file-backed persistence backend used
//! as that secondary store.

mod btree;
mod persistence;

#[cfg(test)]
mod tests;

pub use btree::{BTree, MIN_ORDER};
pub use persistence::FileBackend;

use crate::error::Result;

/// Durable secondary storage for values evicted from memory
///
/// The B-tree treats a backend as an opaque durable map; it does not care how
/// values are encoded or where they live.
pub trait PersistenceBackend<K, V> {
    /// Writes `value` under `key`, replacing any previous record
    fn serialize(&mut self, key: &K, value: &V) -> Result<()>;

    /// Reads the record stored under `key`
    ///
    /// Fails with [`crate::Error::NotFound`] if there is no record, or with a
    /// serialization error if the record cannot be decoded.
    fn deserialize(&mut self, key: &K) -> Result<V>;

    /// Removes the record stored under `key`, returning whether one existed
    fn delete(&mut self, key: &K) -> Result<bool>;
}
