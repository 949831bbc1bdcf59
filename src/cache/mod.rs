mod disk;
mod memory;

use std::sync::Arc;

use crate::error::Result;

pub use disk::DiskCache;
pub use memory::MemoryCache;

/// Storage for opaque byte values keyed by string.
///
/// Implementations must make `get_or_set` compute at most once per key
/// within a process. Across processes duplicate computation is acceptable
/// as long as readers never see a partially written value.
pub trait TileCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Return the stored value, or run `compute` and store its output.
    /// A failed computation stores nothing.
    fn get_or_set(
        &self,
        key: &str,
        compute: &mut dyn FnMut() -> Result<Vec<u8>>,
    ) -> Result<Vec<u8>>;

    fn remove(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// A prefixed view over a shared cache, so several logical caches
/// (styles, rendered tiles, job status) can live in one substrate.
#[derive(Clone)]
pub struct CacheNamespace {
    prefix: String,
    cache: Arc<dyn TileCache>,
}

impl CacheNamespace {
    pub fn new(cache: Arc<dyn TileCache>, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            cache,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.cache.get(&self.scoped(key))
    }

    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.cache.set(&self.scoped(key), value)
    }

    pub fn get_or_set(
        &self,
        key: &str,
        compute: &mut dyn FnMut() -> Result<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        self.cache.get_or_set(&self.scoped(key), compute)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.cache.remove(&self.scoped(key))
    }
}
