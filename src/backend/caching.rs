//! A read-through content cache in front of another backend.
//!
//! Entries are keyed by checksum, so the same content fetched under two
//! names is stored once. Only bytes that passed verification are ever
//! stored, and every hit is verified again before it is handed out.

use super::Backend;
use crate::cache::CacheStore;
use crate::digest::Digest;
use crate::error::Result;
use crate::registry::CacheRegistry;
use crate::stream::{ReadStream, WriteStream};
use std::path::Path;
use std::sync::Arc;

/// Bumping this orphans every existing entry.
pub const CACHE_VERSION: &str = "v0";

pub fn cache_key(checksum: &Digest) -> String {
    format!("{}-{}", CACHE_VERSION, checksum.to_hex())
}

pub struct CachingBackend<B> {
    store: Arc<CacheStore>,
    authoritative: B,
}

impl<B: Backend> CachingBackend<B> {
    /// Cache `authoritative` in the store at `root`, shared through
    /// `registry` with any other backend using the same root.
    pub fn new(
        registry: &CacheRegistry,
        root: impl AsRef<Path>,
        size_limit: u64,
        authoritative: B,
    ) -> Result<Self> {
        let store = registry.open(root, size_limit)?;
        Ok(Self::with_store(store, authoritative))
    }

    pub fn with_store(store: Arc<CacheStore>, authoritative: B) -> Self {
        Self {
            store,
            authoritative,
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn authoritative(&self) -> &B {
        &self.authoritative
    }
}

impl<B: Backend> Backend for CachingBackend<B> {
    fn open_for_read(&self, name: &str, checksum: Option<&Digest>) -> Result<ReadStream> {
        let Some(expected) = checksum else {
            return self.authoritative.open_for_read(name, None);
        };
        let key = cache_key(expected);

        if let Some(bytes) = self.store.get(&key)? {
            tracing::debug!(name, %key, "cache hit");
            return match ReadStream::verified(bytes, Some(expected)) {
                Ok(stream) => Ok(stream),
                Err(e) => {
                    tracing::error!(
                        name,
                        %key,
                        root = %self.store.root().display(),
                        "cached entry failed verification, discarding it: {e}"
                    );
                    if let Err(remove) = self.store.remove(&key) {
                        tracing::warn!(name, %key, "could not remove corrupt cache entry: {remove}");
                    }
                    Err(e)
                }
            };
        }

        tracing::debug!(name, %key, source = %self.authoritative.describe(), "cache miss");
        let bytes = self.authoritative.read_bytes(name, Some(expected))?;
        if let Err(e) = self.store.set(&key, &bytes) {
            tracing::warn!(name, %key, "could not store cache entry: {e}");
        }
        Ok(ReadStream::from_bytes(bytes))
    }

    fn open_for_write(&self, name: &str) -> Result<WriteStream> {
        self.authoritative.open_for_write(name)
    }

    fn describe(&self) -> String {
        format!(
            "{} (cached in {})",
            self.authoritative.describe(),
            self.store.root().display()
        )
    }
}
