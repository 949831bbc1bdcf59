use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;
use tempfile::NamedTempFile;

use super::TileCache;
use crate::error::{Result, TileError};

/// File-backed cache: one file per key, named by the key's SHA-256.
pub struct DiskCache {
    cache_dir: PathBuf,
    // Serializes get_or_set within this process.
    populate: Mutex<()>,
}

impl DiskCache {
    /// Create a new cache with the given directory
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();

        // Create the cache directory if it doesn't exist
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        Ok(Self {
            cache_dir,
            populate: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get the cache path for a key
    fn get_cache_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.cache_dir.join(format!("{:x}", hasher.finalize()))
    }
}

impl TileCache for DiskCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.get_cache_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temp file in the same directory and rename it into
    /// place, so a concurrent reader sees either the old or the new value.
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let file_path = self.get_cache_path(key);

        let mut file = NamedTempFile::new_in(&self.cache_dir)?;
        file.write_all(value)?;
        file.persist(&file_path).map_err(|e| TileError::Io(e.error))?;

        debug!("Stored {} bytes for cache key {}", value.len(), key);
        Ok(())
    }

    fn get_or_set(
        &self,
        key: &str,
        compute: &mut dyn FnMut() -> Result<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let _guard = self
            .populate
            .lock()
            .map_err(|_| TileError::Cache("disk cache lock poisoned".to_string()))?;

        if let Some(existing) = self.get(key)? {
            return Ok(existing);
        }
        let value = compute()?;
        self.set(key, &value)?;
        Ok(value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.get_cache_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Clear the cache
    fn clear(&self) -> Result<()> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        fs::create_dir_all(&self.cache_dir)?;
        Ok(())
    }
}
