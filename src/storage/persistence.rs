//! File-backed persistence for spilled values.
//!
//! # File Layout
//!
//! Every key is stored in its own file inside the backend directory. The file
//! name is the hex BLAKE3 digest of the key followed by the extension of the
//! configured [`SpillFormat`], so arbitrary keys map to safe, fixed-length names.
//!
//! # Write Process
//!
//! 1. Encode the value as JSON or bincode
//! 2. Write it to a temporary file in the same directory
//! 3. Atomically rename the temporary file over the target

use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

use super::PersistenceBackend;
use crate::config::{Config, SpillFormat};
use crate::error::{Error, Result};

/// A persistence backend storing one file per key in a directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    format: SpillFormat,
}

impl FileBackend {
    /// Opens a backend rooted at `dir`
    ///
    /// # Errors
    /// Fails if the directory does not exist and `create_if_missing` is false,
    /// or if it cannot be created.
    pub fn open(dir: impl AsRef<Path>, format: SpillFormat, create_if_missing: bool) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            if !create_if_missing {
                return Err(Error::invalid_argument(format!(
                    "spill directory {} does not exist",
                    dir.display()
                )));
            }
            log::debug!("Creating spill directory at: {}", dir.display());
            fs::create_dir_all(dir)?;
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            format,
        })
    }

    /// Opens a backend using the directory and format from `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(&config.path, config.spill_format, config.create_if_missing)
    }

    /// The directory holding spilled records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The encoding used for records
    pub fn format(&self) -> SpillFormat {
        self.format
    }

    /// Path of the file that holds the record for `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = blake3::hash(key.as_bytes());
        self.dir
            .join(format!("{}.{}", digest.to_hex(), self.format.extension()))
    }

    fn encode<V: Serialize>(&self, value: &V) -> Result<Vec<u8>> {
        match self.format {
            SpillFormat::Json => Ok(serde_json::to_vec_pretty(value)?),
            SpillFormat::Bincode => Ok(bincode::serde::encode_to_vec(
                value,
                bincode::config::standard(),
            )?),
        }
    }

    fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V> {
        match self.format {
            SpillFormat::Json => Ok(serde_json::from_slice(bytes)?),
            SpillFormat::Bincode => {
                let (value, _) =
                    bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
                Ok(value)
            }
        }
    }
}

impl<V> PersistenceBackend<String, V> for FileBackend
where
    V: Serialize + DeserializeOwned,
{
    fn serialize(&mut self, key: &String, value: &V) -> Result<()> {
        let bytes = self.encode(value)?;
        let path = self.path_for(key);

        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(&bytes)?;
        file.flush()?;
        file.persist(&path)?;

        log::debug!("Wrote {} bytes for {} to {}", bytes.len(), key, path.display());
        Ok(())
    }

    fn deserialize(&mut self, key: &String) -> Result<V> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("no spilled record for {key}")));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        self.decode(&bytes)
    }

    fn delete(&mut self, key: &String) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
