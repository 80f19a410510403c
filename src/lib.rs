//! An embeddable document store with full-text search, LRU spill to disk and
//! multi-level undo.
//!
//! Documents are keyed text or binary blobs. Text documents are indexed word by
//! word for exact and prefix search. The store keeps a bounded working set in
//! memory and spills the least recently used documents to a persistence backend,
//! reloading them transparently when they are read again. Every mutation can be
//! undone, either most recent first or per key.
//!
//! ```no_run
//! use docstore::{Config, DocumentFormat, DocumentStore};
//!
//! let config = Config::new().path("/tmp/docstore").max_document_count(100);
//! let mut store = DocumentStore::open(config)?;
//!
//! store.put_bytes("doc://a", "the cat sat", DocumentFormat::Text)?;
//! store.put_bytes("doc://b", "the dog ran", DocumentFormat::Text)?;
//! assert_eq!(store.search("the")?.len(), 2);
//!
//! store.delete_all("cat")?;
//! store.undo()?;
//! assert!(store.get("doc://a")?.is_some());
//! # Ok::<(), docstore::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod document;
pub mod error;
pub mod eviction;
pub mod index;
pub mod storage;
pub mod store;
pub mod undo;

pub use config::{Config, SpillFormat};
pub use document::{Content, Document, DocumentFormat};
pub use error::{Error, Result};
pub use store::DocumentStore;
