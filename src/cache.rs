//! A size-bounded key/value store on local disk.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/entries/<key>   one file per value
//! <root>/tmp/            staging area for atomic writes
//! <root>/lock            advisory lock serializing writers across processes
//! ```
//!
//! The in-memory index (sizes and recency) is rebuilt from `entries/` when a
//! store is opened, ordering existing entries by modification time. Once the
//! total size goes over the limit, least recently used entries are deleted.
//!
//! A `CacheStore` is safe to share between threads. Values are written to a
//! temp file and renamed into place, so a reader never sees half a value.

use crate::error::{Error, Result};
use file_lock::{FileLock, FileOptions};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use tempfile::NamedTempFile;

pub struct CacheStore {
    root: PathBuf,
    size_limit: u64,
    index: Mutex<Index>,
}

#[derive(Default)]
struct Index {
    entries: HashMap<String, Entry>,
    total: u64,
    clock: u64,
}

struct Entry {
    size: u64,
    last_used: u64,
}

impl Index {
    fn touch(&mut self, key: &str, size: u64) {
        self.clock += 1;
        let clock = self.clock;
        match self.entries.get_mut(key) {
            Some(e) => {
                self.total = self.total - e.size + size;
                e.size = size;
                e.last_used = clock;
            }
            None => {
                self.total += size;
                self.entries.insert(
                    key.to_owned(),
                    Entry {
                        size,
                        last_used: clock,
                    },
                );
            }
        }
    }

    fn forget(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(e) => {
                self.total -= e.size;
                true
            }
            None => false,
        }
    }

    fn least_recent_except(&self, keep: &str) -> Option<String> {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != keep)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())
    }
}

impl CacheStore {
    pub fn open(root: impl AsRef<Path>, size_limit: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("entries"))?;
        std::fs::create_dir_all(root.join("tmp"))?;

        let mut found = vec![];
        for dirent in std::fs::read_dir(root.join("entries"))? {
            let dirent = dirent?;
            let meta = dirent.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let Some(key) = dirent.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, key, meta.len()));
        }
        found.sort();

        let mut index = Index::default();
        for (_, key, size) in found {
            index.touch(&key, size);
        }
        tracing::debug!(
            root = %root.display(),
            entries = index.entries.len(),
            bytes = index.total,
            "opened cache store"
        );

        Ok(Self {
            root,
            size_limit,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    /// Number of entries this handle knows about.
    pub fn len(&self) -> usize {
        self.index().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes of the entries this handle knows about.
    pub fn total_size(&self) -> u64 {
        self.index().total
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index().entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => {
                self.index().touch(key, bytes.len() as u64);
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Evicted, possibly by another process.
                self.index().forget(key);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store `value` under `key`, evicting older entries as needed.
    ///
    /// Returns `false` without storing anything when the value alone is
    /// larger than the size limit.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<bool> {
        let path = self.entry_path(key)?;
        let size = value.len() as u64;
        if size > self.size_limit {
            tracing::debug!(key, size, limit = self.size_limit, "value too large to cache");
            return Ok(false);
        }

        let _lock = self.lock()?;
        let mut tmp = NamedTempFile::new_in(self.root.join("tmp"))?;
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|pe| Error::Io(pe.error))?;

        let mut index = self.index();
        index.touch(key, size);
        while index.total > self.size_limit {
            let Some(victim) = index.least_recent_except(key) else {
                break;
            };
            tracing::debug!(key = %victim, "evicting cache entry");
            remove_file(&self.root.join("entries").join(&victim))?;
            index.forget(&victim);
        }
        Ok(true)
    }

    /// Delete `key`. Returns whether an entry was present.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let path = self.entry_path(key)?;
        let _lock = self.lock()?;
        let existed = remove_file(&path)?;
        let known = self.index().forget(key);
        Ok(existed || known)
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.');
        if !valid {
            return Err(Error::InvalidReference {
                reference: key.to_owned(),
                reason: "cache keys are limited to [A-Za-z0-9._-]".into(),
            });
        }
        Ok(self.root.join("entries").join(key))
    }

    fn lock(&self) -> Result<FileLock> {
        let options = FileOptions::new().write(true).create(true);
        Ok(FileLock::lock(self.root.join("lock"), true, options)?)
    }

    fn index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.root)
            .field("size_limit", &self.size_limit)
            .finish()
    }
}

fn remove_file(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
