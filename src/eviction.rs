//! # Eviction Module
//!
//! A binary min-heap of `(key, last use time)` pairs used to find the least
//! recently used resident document.
//!
//! ## Implementation Details
//! - Positions are 1-based: the children of position `i` are `2i` and `2i + 1`
//!   and its parent is `i / 2`. Position `i` is stored at index `i - 1` of a
//!   `Vec`, which doubles its capacity in place when full.
//! - Entries are ordered by timestamp only and located by key with a linear scan.
//!   At most one entry per key is queued at a time.
//! - Removing an arbitrary key lowers its timestamp to [`EvictionQueue::MIN_TIME`]
//!   and extracts the minimum. Callers must never queue an entry at `MIN_TIME`
//!   themselves, which keeps the lowered entry the unique minimum.

use std::borrow::Borrow;
use std::fmt::Debug;

use crate::error::{Error, Result};

/// A queued key and the logical time it was last used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry<K> {
    /// The queued key
    pub key: K,
    /// The last time the key was used
    pub last_used: u64,
}

/// A min-heap of keys ordered by last use time
#[derive(Debug)]
pub struct EvictionQueue<K> {
    heap: Vec<QueueEntry<K>>,
}

impl<K> Default for EvictionQueue<K> {
    fn default() -> Self {
        Self { heap: Vec::new() }
    }
}

impl<K> EvictionQueue<K>
where
    K: PartialEq + Debug,
{
    /// Timestamp reserved for removing an arbitrary entry
    pub const MIN_TIME: u64 = u64::MIN;

    /// Creates an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued keys
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns `true` if `key` is queued
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + Debug + ?Sized,
    {
        self.position(key).is_some()
    }

    /// Iterates over the queued entries in heap order
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry<K>> + '_ {
        self.heap.iter()
    }

    /// The least recently used entry, without removing it
    pub fn peek(&self) -> Option<&QueueEntry<K>> {
        self.heap.first()
    }

    /// Queues `key` with the given timestamp
    ///
    /// If the key is already queued its timestamp is updated instead, so a key
    /// never appears twice.
    pub fn insert(&mut self, key: K, last_used: u64) {
        if let Some(pos) = self.position(&key) {
            self.update(pos, last_used);
            return;
        }

        self.heap.push(QueueEntry { key, last_used });
        let pos = self.heap.len();
        self.sift_up(pos);
    }

    /// Removes and returns the least recently used entry
    ///
    /// # Examples
    /// ```
    /// use docstore::eviction::EvictionQueue;
    ///
    /// let mut queue = EvictionQueue::new();
    /// queue.insert("b", 20);
    /// queue.insert("a", 10);
    /// assert_eq!(queue.extract_min().unwrap().key, "a");
    /// ```
    pub fn extract_min(&mut self) -> Result<QueueEntry<K>> {
        if self.heap.is_empty() {
            return Err(Error::not_found("eviction queue is empty"));
        }

        let min = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(1);
        }
        Ok(min)
    }

    /// Changes the timestamp of a queued key and restores heap order
    ///
    /// Fails with [`Error::NotFound`] if the key is not queued.
    pub fn reheapify<Q>(&mut self, key: &Q, last_used: u64) -> Result<()>
    where
        K: Borrow<Q>,
        Q: PartialEq + Debug + ?Sized,
    {
        let pos = self
            .position(key)
            .ok_or_else(|| Error::not_found(format!("{key:?} is not queued for eviction")))?;
        self.update(pos, last_used);
        Ok(())
    }

    /// Removes a specific key regardless of its timestamp
    pub fn remove<Q>(&mut self, key: &Q) -> Result<QueueEntry<K>>
    where
        K: Borrow<Q>,
        Q: PartialEq + Debug + ?Sized,
    {
        self.reheapify(key, Self::MIN_TIME)?;
        self.extract_min()
    }

    fn update(&mut self, pos: usize, last_used: u64) {
        self.heap[pos - 1].last_used = last_used;
        // The new timestamp may have moved either way
        self.sift_down(pos);
        self.sift_up(pos);
    }

    /// 1-based position of `key`
    fn position<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: PartialEq + Debug + ?Sized,
    {
        self.heap
            .iter()
            .position(|entry| entry.key.borrow() == key)
            .map(|idx| idx + 1)
    }

    fn greater(&self, i: usize, j: usize) -> bool {
        self.heap[i - 1].last_used > self.heap[j - 1].last_used
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i - 1, j - 1);
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 1 && self.greater(pos / 2, pos) {
            self.swap(pos, pos / 2);
            pos /= 2;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let count = self.heap.len();
        while 2 * pos <= count {
            let mut child = 2 * pos;
            if child < count && self.greater(child, child + 1) {
                child += 1;
            }
            if !self.greater(pos, child) {
                break;
            }
            self.swap(pos, child);
            pos = child;
        }
    }
}

#[cfg(test)]
impl<K: PartialEq + Debug> EvictionQueue<K> {
    fn is_heap_ordered(&self) -> bool {
        (2..=self.heap.len()).all(|pos| !self.greater(pos / 2, pos))
    }
}
