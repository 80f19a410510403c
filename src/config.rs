use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default B-tree order (maximum entries per node, exclusive)
pub const DEFAULT_BTREE_ORDER: usize = 6;

/// On-disk encoding used for spilled documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpillFormat {
    /// Human-readable JSON, one file per document
    #[default]
    Json,
    /// Compact bincode encoding, one file per document
    Bincode,
}

impl SpillFormat {
    /// File extension used for files written in this format
    pub fn extension(&self) -> &'static str {
        match self {
            SpillFormat::Json => "json",
            SpillFormat::Bincode => "bin",
        }
    }
}

/// Configuration for a document store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding spilled documents
    pub path: PathBuf,

    /// Whether to create the spill directory if it doesn't exist
    pub create_if_missing: bool,

    /// Maximum number of documents kept resident in memory
    pub max_document_count: usize,

    /// Maximum combined size in bytes of resident documents
    pub max_document_bytes: usize,

    /// Order of the B-tree backing the store (even, greater than 2)
    pub btree_order: usize,

    /// Encoding of spilled documents
    pub spill_format: SpillFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("docstore_data"),
            create_if_missing: true,
            max_document_count: usize::MAX,
            max_document_bytes: usize::MAX,
            btree_order: DEFAULT_BTREE_ORDER,
            spill_format: SpillFormat::Json,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the spill directory
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    /// Enable or disable creating the spill directory if it doesn't exist
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Set the resident document count limit
    pub fn max_document_count(mut self, limit: usize) -> Self {
        self.max_document_count = limit;
        self
    }

    /// Set the resident byte limit
    pub fn max_document_bytes(mut self, limit: usize) -> Self {
        self.max_document_bytes = limit;
        self
    }

    /// Set the B-tree order
    pub fn btree_order(mut self, order: usize) -> Self {
        self.btree_order = order;
        self
    }

    /// Set the spill file encoding
    pub fn spill_format(mut self, format: SpillFormat) -> Self {
        self.spill_format = format;
        self
    }
}
