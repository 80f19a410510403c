//! # Document Module
//!
//! A document is a keyed piece of content: either UTF-8 text or opaque bytes.
//! Text documents carry a word → occurrence count map that is computed once at
//! construction and drives the inverted index and search ranking.
//!
//! ## Key Concepts
//! - **Key**: an opaque, URI-like string that identifies the document.
//! - **Word map**: built by splitting the text on every character that is not an
//!   ASCII letter or digit. Case is preserved, so `Hello` and `hello` are distinct.
//! - **Last use time**: a logical timestamp refreshed whenever the document is read
//!   or returned from a search. It is not part of the document's identity.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::Read;

use crate::error::{Error, Result};

/// How the raw bytes handed to [`Document::from_reader`] are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentFormat {
    /// UTF-8 text, indexed for search
    Text,
    /// Opaque bytes, never indexed
    Binary,
}

/// The content held by a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Content {
    /// UTF-8 text content
    Text(String),
    /// Binary content
    Binary(Bytes),
}

/// A stored document
///
/// Equality and hashing consider only the key and the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    key: String,
    content: Content,
    words: HashMap<String, u32>,
    #[serde(skip)]
    last_use_time: Cell<u64>,
}

impl Document {
    /// Creates a text document and computes its word map
    ///
    /// # Examples
    /// ```
    /// use docstore::Document;
    ///
    /// let doc = Document::text("doc://a", "the cat, the hat").unwrap();
    /// assert_eq!(doc.word_count("the"), 2);
    /// assert_eq!(doc.word_count("The"), 0);
    /// ```
    pub fn text(key: impl Into<String>, text: impl Into<String>) -> Result<Self> {
        let key = validate_key(key.into())?;
        let text = text.into();
        if text.is_empty() {
            return Err(Error::invalid_argument("document text is empty"));
        }

        let mut words = HashMap::new();
        for word in split_words(&text) {
            *words.entry(word.to_string()).or_insert(0) += 1;
        }

        Ok(Self {
            key,
            content: Content::Text(text),
            words,
            last_use_time: Cell::new(0),
        })
    }

    /// Creates a binary document
    pub fn binary(key: impl Into<String>, data: impl Into<Bytes>) -> Result<Self> {
        let key = validate_key(key.into())?;
        let data = data.into();
        if data.is_empty() {
            return Err(Error::invalid_argument("document data is empty"));
        }

        Ok(Self {
            key,
            content: Content::Binary(data),
            words: HashMap::new(),
            last_use_time: Cell::new(0),
        })
    }

    /// Creates a document from raw bytes interpreted according to `format`
    pub fn from_bytes(
        key: impl Into<String>,
        data: impl Into<Bytes>,
        format: DocumentFormat,
    ) -> Result<Self> {
        let data = data.into();
        match format {
            DocumentFormat::Text => {
                let text = std::str::from_utf8(&data)
                    .map_err(|e| Error::invalid_argument(format!("document text is not UTF-8: {e}")))?;
                Self::text(key, text)
            }
            DocumentFormat::Binary => Self::binary(key, data),
        }
    }

    /// Reads a document to the end of `reader`
    pub fn from_reader<R: Read>(
        key: impl Into<String>,
        mut reader: R,
        format: DocumentFormat,
    ) -> Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Self::from_bytes(key, buf, format)
    }

    /// The document key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The document content
    pub fn content(&self) -> &Content {
        &self.content
    }

    /// The text content, if this is a text document
    pub fn text_content(&self) -> Option<&str> {
        match &self.content {
            Content::Text(text) => Some(text),
            Content::Binary(_) => None,
        }
    }

    /// The binary content, if this is a binary document
    pub fn binary_content(&self) -> Option<&Bytes> {
        match &self.content {
            Content::Text(_) => None,
            Content::Binary(data) => Some(data),
        }
    }

    /// The format this document was created with
    pub fn format(&self) -> DocumentFormat {
        match self.content {
            Content::Text(_) => DocumentFormat::Text,
            Content::Binary(_) => DocumentFormat::Binary,
        }
    }

    /// Number of times `word` appears in the document; 0 for binary documents
    pub fn word_count(&self, word: &str) -> u32 {
        self.words.get(word).copied().unwrap_or(0)
    }

    /// Number of word occurrences starting with `prefix`
    pub fn prefix_count(&self, prefix: &str) -> u32 {
        self.words
            .iter()
            .filter(|(word, _)| word.starts_with(prefix))
            .map(|(_, count)| *count)
            .sum()
    }

    /// The distinct words of the document
    pub fn words(&self) -> impl Iterator<Item = &str> + '_ {
        self.words.keys().map(String::as_str)
    }

    /// Size of the content in bytes, as counted against the store's byte limit
    pub fn byte_len(&self) -> usize {
        match &self.content {
            Content::Text(text) => text.len(),
            Content::Binary(data) => data.len(),
        }
    }

    /// The logical time this document was last used
    pub fn last_use_time(&self) -> u64 {
        self.last_use_time.get()
    }

    /// Updates the last use time
    pub fn set_last_use_time(&self, time: u64) {
        self.last_use_time.set(time);
    }

    /// A stable, non-zero digest of the key and content
    ///
    /// Zero is reserved by [`crate::DocumentStore::put`] to mean "nothing replaced".
    pub fn content_hash(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.key.as_bytes());
        match &self.content {
            Content::Text(text) => {
                hasher.update(&[0]);
                hasher.update(text.as_bytes());
            }
            Content::Binary(data) => {
                hasher.update(&[1]);
                hasher.update(data);
            }
        }

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
        u64::from_le_bytes(prefix).max(1)
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.content == other.content
    }
}

impl Eq for Document {}

impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.content.hash(state);
    }
}

/// Splits text into words on every non-alphanumeric ASCII character
pub fn split_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
}

fn validate_key(key: String) -> Result<String> {
    if key.is_empty() {
        return Err(Error::invalid_argument("document key is empty"));
    }
    Ok(key)
}
