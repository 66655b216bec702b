//! Recognized backend options.
//!
//! The document is a small JSON mapping. Every key is optional and unknown
//! keys are ignored, so a config written for a newer version still loads.
//!
//! ```
//! use slicestore::config::BackendConfig;
//!
//! let cfg = BackendConfig::from_json_str(r#"{"caching": {"directory": "/tmp/tiles"}}"#)?;
//! assert_eq!(cfg.caching.size_limit, slicestore::config::DEFAULT_SIZE_LIMIT);
//! assert!(!cfg.s3.unsigned_requests);
//! # Ok::<(), slicestore::Error>(())
//! ```

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SIZE_LIMIT: u64 = 5_000_000_000;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub caching: CachingConfig,
    pub s3: S3Config,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CachingConfig {
    /// Cache root. `None` disables caching.
    pub directory: Option<PathBuf>,
    /// Log which reference is cached where.
    pub debug: bool,
    /// Upper bound on the total bytes kept in the cache.
    pub size_limit: u64,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            debug: false,
            size_limit: DEFAULT_SIZE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Send anonymous requests instead of signing them.
    pub unsigned_requests: bool,
}

impl BackendConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Cache root to use, with `~` expanded, when caching is enabled.
    pub fn cache_directory(&self) -> Option<PathBuf> {
        match &self.caching.directory {
            Some(dir) if self.caching.size_limit > 0 => Some(expand_home(dir)),
            _ => None,
        }
    }

    pub fn with_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.caching.directory = Some(dir.into());
        self
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let home = std::env::var_os("HOME");
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// Transport settings shared by the HTTP and object-store backends.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpConfig {
    pub(crate) fn client(&self) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .build()
            .map_err(|e| Error::transport_cause("http client", e))
    }
}
