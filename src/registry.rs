//! One [`CacheStore`] handle per cache root, shared by every caching backend
//! pointed at it.
//!
//! Opening the same directory twice through a registry returns the same
//! handle, so there is never more than one index per root in a process.
//! Handles stay open until [`CacheRegistry::close`] or
//! [`CacheRegistry::close_all`], regardless of how many backends come and go.

use crate::cache::CacheStore;
use crate::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
pub struct CacheRegistry {
    stores: Mutex<HashMap<PathBuf, Arc<CacheStore>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared store for `root`, opening it on first use.
    ///
    /// `size_limit` only applies when this call is the one that opens the
    /// store.
    pub fn open(&self, root: impl AsRef<Path>, size_limit: u64) -> Result<Arc<CacheStore>> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let key = root.canonicalize()?;

        let mut stores = self.stores();
        if let Some(store) = stores.get(&key) {
            if store.size_limit() != size_limit {
                tracing::debug!(
                    root = %key.display(),
                    open_limit = store.size_limit(),
                    requested_limit = size_limit,
                    "cache already open with a different size limit"
                );
            }
            return Ok(store.clone());
        }

        let store = Arc::new(CacheStore::open(&key, size_limit)?);
        stores.insert(key, store.clone());
        Ok(store)
    }

    /// Release the registry's handle on `root`. Returns whether it was open.
    pub fn close(&self, root: impl AsRef<Path>) -> bool {
        let root = root.as_ref();
        let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        self.stores().remove(&key).is_some()
    }

    pub fn close_all(&self) {
        self.stores().clear();
    }

    pub fn len(&self) -> usize {
        self.stores().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stores(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<CacheStore>>> {
        self.stores.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stores = self.stores();
        f.debug_set().entries(stores.keys()).finish()
    }
}
