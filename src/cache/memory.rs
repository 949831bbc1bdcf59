use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::OnceCell;

use super::TileCache;
use crate::error::{Result, TileError};

type Slot = Arc<OnceCell<Vec<u8>>>;

/// In-process cache. Each key owns a `OnceCell`, so concurrent
/// `get_or_set` callers for the same key block on one computation while
/// other keys proceed independently.
#[derive(Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
        self.slots
            .lock()
            .map_err(|_| TileError::Cache("memory cache lock poisoned".to_string()))
    }

    fn slot(&self, key: &str) -> Result<Slot> {
        let mut slots = self.slots()?;
        Ok(Arc::clone(slots.entry(key.to_string()).or_default()))
    }
}

impl TileCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.slots()?.get(key).and_then(|slot| slot.get().cloned()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let slot = Arc::new(OnceCell::with_value(value.to_vec()));
        self.slots()?.insert(key.to_string(), slot);
        Ok(())
    }

    fn get_or_set(
        &self,
        key: &str,
        compute: &mut dyn FnMut() -> Result<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        // The map lock is released before computing; only the key's cell is held.
        let slot = self.slot(key)?;
        match slot.get_or_try_init(|| compute()) {
            Ok(value) => Ok(value.clone()),
            Err(e) => {
                let mut slots = self.slots()?;
                let unfilled = slots
                    .get(key)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && current.get().is_none());
                if unfilled {
                    slots.remove(key);
                }
                Err(e)
            }
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.slots()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.slots()?.clear();
        Ok(())
    }
}
