//! # Store Module
//!
//! [`DocumentStore`] is the single entry point of the crate. It owns the four
//! internal structures and keeps them consistent on every call:
//!
//! - a [`BTree`] from key to document, which can spill documents to a
//!   [`PersistenceBackend`] and reload them on access,
//! - a [`Trie`] from word to the keys of the text documents containing it,
//! - an [`EvictionQueue`] of resident documents ordered by last use,
//! - an [`UndoLog`] holding the prior state of every mutation.
//!
//! ## Residency
//! A document is *resident* when the tree holds it in memory. Every resident
//! document is queued for eviction and counted against the count and byte
//! limits; spilled documents are neither. Whenever usage exceeds a limit the
//! least recently used resident document is spilled until both limits hold.
//!
//! A document too large to fit within the limits on its own is stored and
//! indexed as usual but spilled straight away, so it never pushes other
//! documents out of memory.
//!
//! ## Recency
//! Use times come from a logical clock that advances once per call. Reading a
//! document, returning it from a search, storing it or restoring it through
//! undo all mark it used.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::rc::Rc;

use bytes::Bytes;

use crate::config::Config;
use crate::document::{Document, DocumentFormat};
use crate::error::{Error, Result};
use crate::eviction::EvictionQueue;
use crate::index::Trie;
use crate::storage::{BTree, FileBackend, PersistenceBackend};
use crate::undo::UndoLog;

/// The state a key held before a mutation
#[derive(Debug, Clone)]
enum UndoAction {
    /// The key held no document
    Remove,
    /// The key held a document that was overwritten
    Replace(Rc<Document>),
    /// The key held a document that was deleted
    Reinsert(Rc<Document>),
}

impl UndoAction {
    fn prior(&self) -> Option<Rc<Document>> {
        match self {
            UndoAction::Remove => None,
            UndoAction::Replace(doc) | UndoAction::Reinsert(doc) => Some(Rc::clone(doc)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            UndoAction::Remove => "remove",
            UndoAction::Replace(_) => "replace",
            UndoAction::Reinsert(_) => "reinsert",
        }
    }
}

/// An embeddable document store with search, LRU spill and undo
///
/// Documents are handed out as `Rc<Document>`: a returned document stays valid
/// even if a later call evicts it from memory.
pub struct DocumentStore {
    documents: BTree<String, Rc<Document>>,
    index: Trie<String>,
    queue: EvictionQueue<String>,
    undo: UndoLog<String, UndoAction>,
    max_document_count: usize,
    max_document_bytes: usize,
    /// Resident documents
    document_count: usize,
    /// Combined size of resident documents
    document_bytes: usize,
    clock: u64,
}

impl DocumentStore {
    /// Opens a store that spills documents to files under `config.path`
    ///
    /// # Examples
    /// ```no_run
    /// use docstore::{Config, DocumentFormat, DocumentStore};
    ///
    /// let mut store = DocumentStore::open(Config::new().path("/tmp/docs"))?;
    /// store.put_bytes("doc://a", "the cat sat", DocumentFormat::Text)?;
    /// assert_eq!(store.search("cat")?.len(), 1);
    /// # Ok::<(), docstore::Error>(())
    /// ```
    pub fn open(config: Config) -> Result<Self> {
        let backend = FileBackend::from_config(&config)?;
        Self::with_backend(config, Box::new(backend))
    }

    /// Creates a store that spills documents to `backend`
    pub fn with_backend(
        config: Config,
        backend: Box<dyn PersistenceBackend<String, Rc<Document>>>,
    ) -> Result<Self> {
        let mut documents = BTree::with_order(config.btree_order)?;
        documents.set_backend(backend);
        log::debug!(
            "opened document store (max {} documents, max {} bytes)",
            config.max_document_count,
            config.max_document_bytes
        );

        Ok(Self {
            documents,
            index: Trie::new(),
            queue: EvictionQueue::new(),
            undo: UndoLog::new(),
            max_document_count: config.max_document_count,
            max_document_bytes: config.max_document_bytes,
            document_count: 0,
            document_bytes: 0,
            clock: EvictionQueue::<String>::MIN_TIME,
        })
    }

    /// Stores the document read from `input` under `key`
    ///
    /// `None` deletes the key instead. Returns the content hash of the document
    /// that was replaced or deleted, or 0 if there was none.
    ///
    /// # Errors
    /// Fails with [`Error::InvalidArgument`] for an empty key or unusable
    /// content, and with the backend's error if a spilled document it replaces
    /// cannot be loaded; in both cases nothing changes.
    ///
    /// An error from spilling documents to make room is reported after the
    /// write has been applied: the new document is stored, indexed and can be
    /// undone, and the documents that could not be spilled stay in memory.
    pub fn put<R: Read>(
        &mut self,
        input: Option<R>,
        key: &str,
        format: DocumentFormat,
    ) -> Result<u64> {
        check_key(key)?;
        match input {
            Some(reader) => self.put_document(Document::from_reader(key, reader, format)?),
            None => Ok(self.remove(key)?.map_or(0, |doc| doc.content_hash())),
        }
    }

    /// Stores a document built from in-memory bytes
    ///
    /// # Errors
    /// As for [`DocumentStore::put`]: a failure to spill other documents is
    /// reported after the write has been kept.
    pub fn put_bytes(
        &mut self,
        key: &str,
        data: impl Into<Bytes>,
        format: DocumentFormat,
    ) -> Result<u64> {
        check_key(key)?;
        self.put_document(Document::from_bytes(key, data, format)?)
    }

    /// Stores an already built document under its own key
    ///
    /// Returns the content hash of the replaced document, or 0. Errors behave
    /// as for [`DocumentStore::put`].
    pub fn put_document(&mut self, doc: Document) -> Result<u64> {
        let doc = Rc::new(doc);
        let key = doc.key().to_string();

        let previous = self.documents.put(key.clone(), Some(Rc::clone(&doc)))?;
        if let Some(previous) = &previous {
            self.unindex(previous);
            self.release(previous);
        }
        self.index_words(&doc);

        let action = match &previous {
            Some(previous) => UndoAction::Replace(Rc::clone(previous)),
            None => UndoAction::Remove,
        };
        self.undo.push_single(key, action);
        log::debug!("stored {} ({} bytes)", doc.key(), doc.byte_len());

        let time = self.tick();
        self.refresh(&doc, time)?;
        self.enforce_capacity()?;
        Ok(previous.map_or(0, |previous| previous.content_hash()))
    }

    /// Returns the document stored under `key`, loading it back if it was spilled
    pub fn get(&mut self, key: &str) -> Result<Option<Rc<Document>>> {
        check_key(key)?;
        let time = self.tick();
        let doc = self.fetch(key, time)?;
        self.enforce_capacity()?;
        Ok(doc)
    }

    /// Deletes the document stored under `key`
    ///
    /// Returns `false` if there was none.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        check_key(key)?;
        Ok(self.remove(key)?.is_some())
    }

    /// Text documents containing `word`, most occurrences first
    ///
    /// Documents with equal counts keep the order in which they were indexed.
    pub fn search(&mut self, word: &str) -> Result<Vec<Rc<Document>>> {
        let keys = self.index.exact_match(word);
        let docs = self.fetch_all(&keys)?;
        let ranked = self
            .index
            .exact_match_sorted(word, by_rank(&docs, |doc| doc.word_count(word)));
        Ok(in_order(docs, ranked))
    }

    /// Text documents containing a word that starts with `prefix`, ranked by
    /// the total occurrences of such words
    pub fn search_by_prefix(&mut self, prefix: &str) -> Result<Vec<Rc<Document>>> {
        let keys = self.index.prefix_match(prefix);
        let docs = self.fetch_all(&keys)?;
        let ranked = self
            .index
            .prefix_match_sorted(prefix, by_rank(&docs, |doc| doc.prefix_count(prefix)));
        Ok(in_order(docs, ranked))
    }

    /// Deletes every text document containing `word`
    ///
    /// The deletions are undone together by [`DocumentStore::undo`], or one key
    /// at a time by [`DocumentStore::undo_key`].
    pub fn delete_all(&mut self, word: &str) -> Result<HashSet<String>> {
        let keys = self.index.exact_match(word);
        self.delete_keys(keys)
    }

    /// Deletes every text document containing a word that starts with `prefix`
    pub fn delete_all_with_prefix(&mut self, prefix: &str) -> Result<HashSet<String>> {
        let keys = self.index.prefix_match(prefix);
        self.delete_keys(keys)
    }

    /// Undoes the most recent mutation
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is nothing to undo.
    pub fn undo(&mut self) -> Result<()> {
        let mut undo = std::mem::take(&mut self.undo);
        let result = undo.undo_last(|key, action| self.restore(key, action));
        self.undo = undo;
        result
    }

    /// Undoes the most recent mutation of `key`, leaving other entries in place
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if no recorded mutation touched `key`.
    pub fn undo_key(&mut self, key: &str) -> Result<()> {
        check_key(key)?;
        let mut undo = std::mem::take(&mut self.undo);
        let result = undo.undo_for_key(key, |key, action| self.restore(key, action));
        self.undo = undo;
        result
    }

    /// Sets the maximum number of resident documents, spilling any excess
    pub fn set_max_document_count(&mut self, limit: usize) -> Result<()> {
        self.max_document_count = limit;
        self.enforce_capacity()
    }

    /// Sets the maximum combined size of resident documents, spilling any excess
    pub fn set_max_document_bytes(&mut self, limit: usize) -> Result<()> {
        self.max_document_bytes = limit;
        self.enforce_capacity()
    }

    /// The resident document limit
    pub fn max_document_count(&self) -> usize {
        self.max_document_count
    }

    /// The resident byte limit
    pub fn max_document_bytes(&self) -> usize {
        self.max_document_bytes
    }

    /// Number of documents held in memory
    pub fn document_count(&self) -> usize {
        self.document_count
    }

    /// Combined size of the documents held in memory
    pub fn document_bytes(&self) -> usize {
        self.document_bytes
    }

    /// Number of stored documents, resident or spilled
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns `true` if no document is stored
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Returns `true` if a document is stored under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.documents.contains_key(key)
    }

    /// Returns `true` if the document under `key` currently lives only in the backend
    pub fn is_spilled(&self, key: &str) -> bool {
        self.documents.is_spilled(key)
    }

    /// Number of mutations that can be undone
    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Keys of every stored document, in ascending order
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.documents.keys().map(String::as_str)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Removes the document under `key`, recording it for undo
    fn remove(&mut self, key: &str) -> Result<Option<Rc<Document>>> {
        let Some(doc) = self.documents.put(key.to_string(), None)? else {
            return Ok(None);
        };
        self.unindex(&doc);
        self.release(&doc);
        self.undo
            .push_single(key.to_string(), UndoAction::Reinsert(Rc::clone(&doc)));

        log::debug!("deleted {}", key);
        Ok(Some(doc))
    }

    /// Loads the document under `key` and marks it used, without enforcing limits
    fn fetch(&mut self, key: &str, time: u64) -> Result<Option<Rc<Document>>> {
        let Some(doc) = self.documents.get(key)?.cloned() else {
            return Ok(None);
        };
        self.refresh(&doc, time)?;
        Ok(Some(doc))
    }

    /// Fetches every document in `keys` as one use, then enforces the limits
    fn fetch_all(&mut self, keys: &[String]) -> Result<HashMap<String, Rc<Document>>> {
        let time = self.tick();
        let mut docs = HashMap::with_capacity(keys.len());
        for key in keys {
            match self.fetch(key, time) {
                Ok(Some(doc)) => {
                    docs.insert(key.clone(), doc);
                }
                Ok(None) => log::warn!("index refers to missing document {}", key),
                Err(err) => return Err(self.recover(err)),
            }
        }
        self.enforce_capacity()?;
        Ok(docs)
    }

    /// Deletes every document in `keys` and records them as one undo batch
    ///
    /// Spilled documents are all loaded before anything is removed, so a failed
    /// load leaves every document stored.
    fn delete_keys(&mut self, keys: Vec<String>) -> Result<HashSet<String>> {
        let mut loaded = Vec::with_capacity(keys.len());
        for key in &keys {
            let was_spilled = self.documents.is_spilled(key.as_str());
            let found = self.documents.get(key.as_str()).map(|doc| doc.cloned());
            match found {
                Ok(Some(doc)) => loaded.push((doc, was_spilled)),
                Ok(None) => log::warn!("index refers to missing document {}", key),
                Err(err) => {
                    // Documents reloaded so far stay in memory and are counted again
                    let time = self.tick();
                    for (doc, _) in loaded.iter().filter(|(_, was_spilled)| *was_spilled) {
                        if let Err(secondary) = self.refresh(doc, time) {
                            log::error!("could not settle {}: {}", doc.key(), secondary);
                        }
                    }
                    return Err(self.recover(err));
                }
            }
        }

        let mut removed = HashSet::with_capacity(loaded.len());
        let mut commands = Vec::with_capacity(loaded.len());
        for (doc, _) in loaded {
            let key = doc.key().to_string();
            // Resident by now, so the tree does not touch the backend
            self.documents.put(key.clone(), None)?;
            self.unindex(&doc);
            self.release(&doc);
            removed.insert(key.clone());
            commands.push((key, UndoAction::Reinsert(doc)));
        }

        log::debug!("deleted {} documents in one batch", removed.len());
        self.undo.push_batch(commands);
        Ok(removed)
    }

    /// Returns `key` to the state captured by `action`
    fn restore(&mut self, key: &str, action: &UndoAction) -> Result<()> {
        let prior = action.prior();
        let current = self.documents.put(key.to_string(), prior.clone())?;
        if let Some(current) = &current {
            self.unindex(current);
            self.release(current);
        }

        if let Some(prior) = &prior {
            self.index_words(prior);
            let time = self.tick();
            self.refresh(prior, time)?;
        }

        log::debug!("undo: {} {}", action.name(), key);
        self.enforce_capacity()
    }

    /// Marks a resident document used at `time` and counts it
    ///
    /// A document that cannot fit within the limits on its own is spilled again
    /// instead. If that spill fails the document is counted anyway, so the store
    /// stays consistent, and the error is returned.
    fn refresh(&mut self, doc: &Rc<Document>, time: u64) -> Result<()> {
        doc.set_last_use_time(time);
        if self.fits(doc) {
            self.admit(doc);
            return Ok(());
        }

        if let Err(err) = self.documents.move_to_secondary(doc.key()) {
            self.admit(doc);
            return Err(err);
        }
        // It may still be queued from an earlier spill that failed
        self.release(doc);
        log::debug!("{} does not fit in memory on its own, spilled", doc.key());
        Ok(())
    }

    fn fits(&self, doc: &Document) -> bool {
        self.max_document_count > 0 && doc.byte_len() <= self.max_document_bytes
    }

    /// Queues `doc` at its last use time, counting it if it was not yet queued
    fn admit(&mut self, doc: &Document) {
        if !self.queue.contains(doc.key()) {
            self.document_count += 1;
            self.document_bytes += doc.byte_len();
        }
        self.queue.insert(doc.key().to_string(), doc.last_use_time());
    }

    /// Stops counting a document that is leaving memory
    fn release(&mut self, doc: &Document) {
        if self.queue.remove(doc.key()).is_ok() {
            self.document_count -= 1;
            self.document_bytes -= doc.byte_len();
        }
    }

    fn index_words(&mut self, doc: &Document) {
        let key = doc.key().to_string();
        for word in doc.words() {
            self.index.put(word, key.clone());
        }
    }

    fn unindex(&mut self, doc: &Document) {
        let key = doc.key().to_string();
        for word in doc.words() {
            self.index.delete(word, &key);
        }
    }

    /// Spills least recently used documents until both limits hold
    ///
    /// If a spill fails the document stays resident and counted.
    fn enforce_capacity(&mut self) -> Result<()> {
        while self.document_count > self.max_document_count
            || self.document_bytes > self.max_document_bytes
        {
            let Ok(entry) = self.queue.extract_min() else {
                break;
            };
            let Some(bytes) = self
                .documents
                .get_resident(entry.key.as_str())
                .map(|doc| doc.byte_len())
            else {
                log::error!("eviction queue held {} but it is not in memory", entry.key);
                self.recount();
                continue;
            };

            if let Err(err) = self.documents.move_to_secondary(entry.key.as_str()) {
                self.queue.insert(entry.key, entry.last_used);
                return Err(err);
            }
            self.document_count -= 1;
            self.document_bytes -= bytes;
            log::debug!("evicted {} (last used at {})", entry.key, entry.last_used);
        }
        Ok(())
    }

    /// Recomputes the usage counters from the queued resident documents
    fn recount(&mut self) {
        let documents = &self.documents;
        let (count, bytes) = self
            .queue
            .iter()
            .filter_map(|entry| documents.get_resident(entry.key.as_str()))
            .fold((0, 0), |(count, bytes), doc| (count + 1, bytes + doc.byte_len()));
        self.document_count = count;
        self.document_bytes = bytes;
    }

    /// Brings usage back within the limits after `err` interrupted an operation
    fn recover(&mut self, err: Error) -> Error {
        if let Err(secondary) = self.enforce_capacity() {
            log::error!("could not enforce limits after \"{}\": {}", err, secondary);
        }
        err
    }
}

/// Comparator ordering keys by descending `rank` of their fetched documents
fn by_rank<'a, F>(
    docs: &'a HashMap<String, Rc<Document>>,
    rank: F,
) -> impl FnMut(&String, &String) -> Ordering + 'a
where
    F: Fn(&Document) -> u32 + 'a,
{
    move |a: &String, b: &String| {
        let score = |key: &String| docs.get(key).map_or(0, |doc| rank(doc.as_ref()));
        score(b).cmp(&score(a))
    }
}

/// The documents of `keys`, in that order
fn in_order(mut docs: HashMap<String, Rc<Document>>, keys: Vec<String>) -> Vec<Rc<Document>> {
    keys.into_iter().filter_map(|key| docs.remove(&key)).collect()
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_argument("document key is empty"));
    }
    Ok(())
}

#[cfg(test)]
impl DocumentStore {
    /// Panics if residency, the eviction queue and the counters disagree
    fn check_accounting(&self) {
        let resident: Vec<_> = self
            .documents
            .keys()
            .filter_map(|key| self.documents.get_resident(key.as_str()))
            .collect();

        assert_eq!(resident.len(), self.document_count);
        assert_eq!(self.queue.len(), self.document_count);
        assert_eq!(
            resident.iter().map(|doc| doc.byte_len()).sum::<usize>(),
            self.document_bytes
        );
        for doc in &resident {
            assert!(self.queue.contains(doc.key()), "{} is not queued", doc.key());
        }
    }

    /// Panics if usage exceeds either limit
    fn check_limits(&self) {
        assert!(self.document_count <= self.max_document_count);
        assert!(self.document_bytes <= self.max_document_bytes);
    }
}
