//! Undo log: a LIFO stack of reversible commands.
//!
//! Every mutating store operation pushes one entry. An entry is either a single
//! command bound to one key, or a batch of commands produced by one bulk
//! operation. Members of a batch can be undone one key at a time; the batch
//! leaves the log once its last member has been undone.
//!
//! The log does not know how to apply a command. Callers pass an `apply`
//! function, and an entry is only removed after `apply` succeeds for it.

use std::borrow::Borrow;
use std::fmt::Debug;

use crate::error::{Error, Result};

/// A reversible action bound to a key
#[derive(Debug, Clone, PartialEq)]
pub struct Command<K, A> {
    /// The key the action restores
    pub key: K,
    /// The captured prior state
    pub action: A,
}

/// One entry of the undo log
#[derive(Debug, Clone, PartialEq)]
pub enum UndoEntry<K, A> {
    /// A command produced by a single-key operation
    Single(Command<K, A>),
    /// The commands produced by one bulk operation
    Batch(Vec<Command<K, A>>),
}

impl<K, A> UndoEntry<K, A> {
    fn references<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        match self {
            UndoEntry::Single(command) => command.key.borrow() == key,
            UndoEntry::Batch(commands) => commands.iter().any(|c| c.key.borrow() == key),
        }
    }
}

/// A stack of undo entries
#[derive(Debug)]
pub struct UndoLog<K, A> {
    entries: Vec<UndoEntry<K, A>>,
}

impl<K, A> Default for UndoLog<K, A> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K, A> UndoLog<K, A>
where
    K: PartialEq + Debug,
{
    /// Creates an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in the log
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there is nothing to undo
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if some entry can undo an operation on `key`
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.entries.iter().any(|entry| entry.references(key))
    }

    /// Pushes a command for a single-key operation
    pub fn push_single(&mut self, key: K, action: A) {
        self.entries
            .push(UndoEntry::Single(Command { key, action }));
    }

    /// Pushes the commands of one bulk operation as a single entry
    ///
    /// An empty batch is not recorded.
    pub fn push_batch(&mut self, commands: Vec<(K, A)>) {
        if commands.is_empty() {
            return;
        }
        self.entries.push(UndoEntry::Batch(
            commands
                .into_iter()
                .map(|(key, action)| Command { key, action })
                .collect(),
        ));
    }

    /// Undoes the most recent entry
    ///
    /// Every member of a batch is applied, newest first. If `apply` fails the
    /// failing command and any not yet applied stay in the log.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the log is empty, or the error from `apply`.
    pub fn undo_last<F>(&mut self, mut apply: F) -> Result<()>
    where
        F: FnMut(&K, &A) -> Result<()>,
    {
        let entry = self
            .entries
            .last_mut()
            .ok_or_else(|| Error::not_found("nothing to undo"))?;

        match entry {
            UndoEntry::Single(command) => apply(&command.key, &command.action)?,
            UndoEntry::Batch(commands) => {
                while let Some(command) = commands.last() {
                    apply(&command.key, &command.action)?;
                    commands.pop();
                }
            }
        }

        self.entries.pop();
        Ok(())
    }

    /// Undoes the most recent operation on `key`
    ///
    /// Entries above it keep their relative order. For a batch only the member
    /// bound to `key` is applied; the batch is dropped once it has no members left.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if no entry references `key`, or the error
    /// from `apply`.
    pub fn undo_for_key<Q, F>(&mut self, key: &Q, mut apply: F) -> Result<()>
    where
        K: Borrow<Q>,
        Q: PartialEq + Debug + ?Sized,
        F: FnMut(&K, &A) -> Result<()>,
    {
        let idx = self
            .entries
            .iter()
            .rposition(|entry| entry.references(key))
            .ok_or_else(|| Error::not_found(format!("no undo entry for {key:?}")))?;

        let exhausted = match &mut self.entries[idx] {
            UndoEntry::Single(command) => {
                apply(&command.key, &command.action)?;
                true
            }
            UndoEntry::Batch(commands) => {
                // references() guarantees a member for this key
                if let Some(pos) = commands.iter().position(|c| c.key.borrow() == key) {
                    apply(&commands[pos].key, &commands[pos].action)?;
                    commands.remove(pos);
                }
                commands.is_empty()
            }
        };

        if exhausted {
            self.entries.remove(idx);
        }
        Ok(())
    }
}
