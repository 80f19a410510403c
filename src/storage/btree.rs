//! # B-tree Module
//!
//! An ordered key-value store built as a B-tree whose values can be moved out
//! to a [`PersistenceBackend`] and transparently loaded back on access.
//!
//! ## Layout
//! - Nodes live in two arenas (leaves and internal nodes) and refer to each other
//!   by index, which lets the leaves form a doubly linked sibling chain without
//!   shared ownership.
//! - Internal entries hold a routing key (the leftmost key of the child's subtree)
//!   and a child reference. Leaf entries hold a key and a [`Slot`].
//! - A node holds at most `order - 1` entries. Inserting the `order`-th entry
//!   splits the node in half and pushes a new routing entry into the parent.
//!
//! ## Deletion
//! Entries are never removed. Storing `None` under a key marks its slot absent,
//! so node occupancy never shrinks and no merging is needed.

use std::borrow::Borrow;
use std::fmt::Debug;

use super::PersistenceBackend;
use crate::config::DEFAULT_BTREE_ORDER;
use crate::error::{Error, Result};

/// Smallest order a tree can be built with
pub const MIN_ORDER: usize = 4;

/// Where the value of a leaf entry currently lives
#[derive(Debug)]
enum Slot<V> {
    /// The value is held in memory
    Resident(V),
    /// The value lives only in the persistence backend
    Spilled,
    /// The key was deleted
    Absent,
}

#[derive(Debug)]
struct LeafEntry<K, V> {
    key: K,
    slot: Slot<V>,
}

#[derive(Debug)]
struct Branch<K> {
    key: K,
    child: NodeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRef {
    Leaf(usize),
    Internal(usize),
}

#[derive(Debug)]
struct Leaf<K, V> {
    entries: Vec<LeafEntry<K, V>>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Internal<K> {
    entries: Vec<Branch<K>>,
}

/// A B-tree map with optional overflow to a persistence backend
pub struct BTree<K, V> {
    leaves: Vec<Leaf<K, V>>,
    internals: Vec<Internal<K>>,
    root: NodeRef,
    height: usize,
    order: usize,
    len: usize,
    backend: Option<Box<dyn PersistenceBackend<K, V>>>,
}

impl<K, V> BTree<K, V>
where
    K: Ord + Clone + Debug,
{
    /// Creates an empty tree with the default order
    pub fn new() -> Self {
        Self::empty(DEFAULT_BTREE_ORDER)
    }

    /// Creates an empty tree with the given order
    ///
    /// The order must be even and at least [`MIN_ORDER`].
    ///
    /// # Examples
    /// ```
    /// use docstore::storage::BTree;
    ///
    /// assert!(BTree::<u32, u32>::with_order(8).is_ok());
    /// assert!(BTree::<u32, u32>::with_order(5).is_err());
    /// ```
    pub fn with_order(order: usize) -> Result<Self> {
        if order < MIN_ORDER || order % 2 != 0 {
            return Err(Error::invalid_argument(format!(
                "B-tree order must be even and at least {MIN_ORDER}, got {order}"
            )));
        }
        Ok(Self::empty(order))
    }

    fn empty(order: usize) -> Self {
        Self {
            leaves: vec![Leaf {
                entries: Vec::with_capacity(order),
                prev: None,
                next: None,
            }],
            internals: Vec::new(),
            root: NodeRef::Leaf(0),
            height: 0,
            order,
            len: 0,
            backend: None,
        }
    }

    /// Attaches the backend used for spilled values
    pub fn set_backend(&mut self, backend: Box<dyn PersistenceBackend<K, V>>) {
        self.backend = Some(backend);
    }

    /// Returns `true` if a backend is attached
    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// The order of the tree
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of levels above the leaves
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of keys holding a value, resident or spilled
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no key holds a value
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Looks up a value, loading it back from the backend if it was spilled
    ///
    /// A reloaded value becomes resident again and its backend record is removed.
    pub fn get<Q>(&mut self, key: &Q) -> Result<Option<&V>>
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        Ok(self.get_mut(key)?.map(|value| &*value))
    }

    /// Mutable variant of [`BTree::get`]
    pub fn get_mut<Q>(&mut self, key: &Q) -> Result<Option<&mut V>>
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        let Some((leaf, idx)) = self.locate(key) else {
            return Ok(None);
        };
        if matches!(self.leaves[leaf].entries[idx].slot, Slot::Spilled) {
            self.reload(leaf, idx)?;
        }

        match &mut self.leaves[leaf].entries[idx].slot {
            Slot::Resident(value) => Ok(Some(value)),
            Slot::Spilled | Slot::Absent => Ok(None),
        }
    }

    /// Returns the value only if it is currently held in memory
    pub fn get_resident<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        let (leaf, idx) = self.locate(key)?;
        match &self.leaves[leaf].entries[idx].slot {
            Slot::Resident(value) => Some(value),
            Slot::Spilled | Slot::Absent => None,
        }
    }

    /// Returns `true` if the key holds a value, resident or spilled
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        self.locate(key).is_some_and(|(leaf, idx)| {
            !matches!(self.leaves[leaf].entries[idx].slot, Slot::Absent)
        })
    }

    /// Returns `true` if the key's value currently lives only in the backend
    pub fn is_spilled<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        self.locate(key).is_some_and(|(leaf, idx)| {
            matches!(self.leaves[leaf].entries[idx].slot, Slot::Spilled)
        })
    }

    /// Stores `value` under `key`, returning the previous value
    ///
    /// Storing `None` deletes the key. An existing key is overwritten in place,
    /// loading its previous value back from the backend first if it was spilled.
    pub fn put(&mut self, key: K, value: Option<V>) -> Result<Option<V>> {
        if let Some((leaf, idx)) = self.locate(&key) {
            if matches!(self.leaves[leaf].entries[idx].slot, Slot::Spilled) {
                self.reload(leaf, idx)?;
            }

            let inserting = value.is_some();
            let new_slot = value.map_or(Slot::Absent, Slot::Resident);
            let old = match std::mem::replace(&mut self.leaves[leaf].entries[idx].slot, new_slot) {
                Slot::Resident(old) => Some(old),
                Slot::Spilled | Slot::Absent => None,
            };

            match (old.is_some(), inserting) {
                (false, true) => self.len += 1,
                (true, false) => self.len -= 1,
                _ => {}
            }
            return Ok(old);
        }

        let Some(value) = value else {
            return Ok(None);
        };

        if let Some(sibling) = self.insert(self.root, key, value) {
            self.grow_root(sibling);
        }
        self.len += 1;
        Ok(None)
    }

    /// Moves a resident value to the backend, leaving the key spilled
    ///
    /// Fails if no backend is attached or the key has no resident value.
    pub fn move_to_secondary<Q>(&mut self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        let located = self.locate(key);
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| Error::NotSupported("no persistence backend attached".into()))?;
        let (leaf, idx) =
            located.ok_or_else(|| Error::not_found(format!("no value for key {key:?}")))?;

        let entry = &mut self.leaves[leaf].entries[idx];
        let Slot::Resident(value) = &entry.slot else {
            return Err(Error::not_found(format!("no resident value for key {key:?}")));
        };

        backend.serialize(&entry.key, value)?;
        entry.slot = Slot::Spilled;
        log::debug!("spilled {:?} to secondary storage", key);
        Ok(())
    }

    /// Iterates over every key holding a value, in ascending order
    ///
    /// Traversal follows the leaf sibling chain.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        std::iter::successors(Some(self.leftmost_leaf()), move |&id| self.leaves[id].next)
            .flat_map(move |id| self.leaves[id].entries.iter())
            .filter(|entry| !matches!(entry.slot, Slot::Absent))
            .map(|entry| &entry.key)
    }

    fn leftmost_leaf(&self) -> usize {
        let mut node = self.root;
        loop {
            match node {
                NodeRef::Leaf(id) => return id,
                NodeRef::Internal(id) => node = self.internals[id].entries[0].child,
            }
        }
    }

    fn find_leaf<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        let mut node = self.root;
        loop {
            match node {
                NodeRef::Leaf(id) => return id,
                NodeRef::Internal(id) => {
                    let entries = &self.internals[id].entries;
                    node = entries[route(entries, key)].child;
                }
            }
        }
    }

    fn locate<Q>(&self, key: &Q) -> Option<(usize, usize)>
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        let leaf = self.find_leaf(key);
        self.leaves[leaf]
            .entries
            .binary_search_by(|entry| entry.key.borrow().cmp(key))
            .ok()
            .map(|idx| (leaf, idx))
    }

    fn reload(&mut self, leaf: usize, idx: usize) -> Result<()> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| Error::NotSupported("no persistence backend attached".into()))?;
        let key = &self.leaves[leaf].entries[idx].key;

        let value = backend.deserialize(key)?;
        if !backend.delete(key)? {
            log::warn!("backend had no record to remove for reloaded key {:?}", key);
        }
        log::debug!("reloaded {:?} from secondary storage", key);

        self.leaves[leaf].entries[idx].slot = Slot::Resident(value);
        Ok(())
    }

    /// Inserts a key that is not yet in the tree below `node`
    ///
    /// Returns the new right sibling if `node` had to be split.
    fn insert(&mut self, node: NodeRef, key: K, value: V) -> Option<NodeRef> {
        match node {
            NodeRef::Leaf(id) => {
                let entries = &mut self.leaves[id].entries;
                let pos = entries.partition_point(|entry| entry.key < key);
                entries.insert(
                    pos,
                    LeafEntry {
                        key,
                        slot: Slot::Resident(value),
                    },
                );

                (entries.len() >= self.order).then(|| self.split_leaf(id))
            }
            NodeRef::Internal(id) => {
                let entries = &mut self.internals[id].entries;
                let j = route(entries, &key);
                if j == 0 && key < entries[0].key {
                    entries[0].key = key.clone();
                }
                let child = entries[j].child;

                let sibling = self.insert(child, key, value)?;
                let boundary = self.first_key(sibling);
                let entries = &mut self.internals[id].entries;
                entries.insert(
                    j + 1,
                    Branch {
                        key: boundary,
                        child: sibling,
                    },
                );

                (entries.len() >= self.order).then(|| self.split_internal(id))
            }
        }
    }

    fn split_leaf(&mut self, id: usize) -> NodeRef {
        let upper = self.leaves[id].entries.split_off(self.order / 2);
        let new_id = self.leaves.len();
        let next = self.leaves[id].next;

        self.leaves.push(Leaf {
            entries: upper,
            prev: Some(id),
            next,
        });
        if let Some(next) = next {
            self.leaves[next].prev = Some(new_id);
        }
        self.leaves[id].next = Some(new_id);

        log::debug!("split leaf {} into {}", id, new_id);
        NodeRef::Leaf(new_id)
    }

    fn split_internal(&mut self, id: usize) -> NodeRef {
        let upper = self.internals[id].entries.split_off(self.order / 2);
        let new_id = self.internals.len();
        self.internals.push(Internal { entries: upper });

        log::debug!("split internal node {} into {}", id, new_id);
        NodeRef::Internal(new_id)
    }

    fn grow_root(&mut self, sibling: NodeRef) {
        let old_root = self.root;
        let entries = vec![
            Branch {
                key: self.first_key(old_root),
                child: old_root,
            },
            Branch {
                key: self.first_key(sibling),
                child: sibling,
            },
        ];

        let id = self.internals.len();
        self.internals.push(Internal { entries });
        self.root = NodeRef::Internal(id);
        self.height += 1;
        log::debug!("root split, tree height is now {}", self.height);
    }

    fn first_key(&self, node: NodeRef) -> K {
        match node {
            NodeRef::Leaf(id) => self.leaves[id].entries[0].key.clone(),
            NodeRef::Internal(id) => self.internals[id].entries[0].key.clone(),
        }
    }
}

impl<K, V> Default for BTree<K, V>
where
    K: Ord + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the child whose range covers `key`
///
/// The first routing key is never consulted: anything below the second
/// boundary belongs to the first child.
fn route<K, Q>(entries: &[Branch<K>], key: &Q) -> usize
where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
{
    entries[1..].partition_point(|branch| branch.key.borrow() <= key)
}

#[cfg(test)]
impl<K, V> BTree<K, V>
where
    K: Ord + Clone + Debug,
{
    /// Panics if any structural invariant of the tree is violated
    pub(crate) fn check_invariants(&self) {
        let mut leaf_depths = Vec::new();
        self.check_node(self.root, 0, true, &mut leaf_depths);
        assert!(
            leaf_depths.iter().all(|&depth| depth == self.height),
            "leaves at uneven depths: {leaf_depths:?}, height {}",
            self.height
        );

        // The sibling chain visits every leaf in key order, with matching back links
        let mut prev = None;
        let mut visited = 0;
        let mut last_key: Option<&K> = None;
        let mut cursor = Some(self.leftmost_leaf());
        while let Some(id) = cursor {
            let leaf = &self.leaves[id];
            assert_eq!(leaf.prev, prev, "broken back link at leaf {id}");
            for entry in &leaf.entries {
                if let Some(last) = last_key {
                    assert!(last < &entry.key, "leaf chain out of order");
                }
                last_key = Some(&entry.key);
            }
            visited += 1;
            prev = Some(id);
            cursor = leaf.next;
        }
        assert_eq!(visited, self.leaves.len(), "leaf chain skips leaves");
    }

    fn check_node(&self, node: NodeRef, depth: usize, is_root: bool, leaf_depths: &mut Vec<usize>) {
        let count = match node {
            NodeRef::Leaf(id) => self.leaves[id].entries.len(),
            NodeRef::Internal(id) => self.internals[id].entries.len(),
        };
        assert!(count < self.order, "node {node:?} overflows with {count} entries");
        if !is_root {
            assert!(count >= self.order / 2, "node {node:?} underfull with {count} entries");
        }

        match node {
            NodeRef::Leaf(id) => {
                let entries = &self.leaves[id].entries;
                assert!(entries.windows(2).all(|w| w[0].key < w[1].key), "unsorted leaf {id}");
                leaf_depths.push(depth);
            }
            NodeRef::Internal(id) => {
                let entries = &self.internals[id].entries;
                assert!(entries.windows(2).all(|w| w[0].key < w[1].key), "unsorted node {id}");
                for branch in entries {
                    assert_eq!(
                        branch.key,
                        self.first_key_of_subtree(branch.child),
                        "routing key is not the subtree's leftmost key"
                    );
                    self.check_node(branch.child, depth + 1, false, leaf_depths);
                }
            }
        }
    }

    fn first_key_of_subtree(&self, mut node: NodeRef) -> K {
        loop {
            match node {
                NodeRef::Leaf(_) => return self.first_key(node),
                NodeRef::Internal(id) => node = self.internals[id].entries[0].child,
            }
        }
    }
}
