//! Read/write access to named objects under one storage root.
//!
//! Every transport implements [`Backend`]. [`CachingBackend`] implements it
//! too, wrapping another backend, so callers never need to know whether a
//! cache sits in front of the real store.
//!
//! ```
//! use slicestore::backend::{Backend, DiskBackend};
//! use slicestore::digest::Digest;
//! use std::io::Read;
//!
//! let dir = tempfile::tempdir()?;
//! let disk = DiskBackend::new(dir.path());
//! disk.write_from_stream("tile.npy", &mut &b"pixels"[..], 4)?;
//!
//! let mut out = vec![];
//! disk.open_for_read("tile.npy", Some(&Digest::from("pixels")))?
//!     .read_to_end(&mut out)?;
//! assert_eq!(out, b"pixels");
//! # Ok::<(), slicestore::Error>(())
//! ```

pub mod caching;
pub mod disk;
pub mod http;
pub mod object_store;

pub use caching::CachingBackend;
pub use disk::DiskBackend;
pub use http::HttpBackend;
pub use object_store::{MemoryObjectClient, ObjectClient, ObjectStoreBackend, S3Client};

use crate::digest::Digest;
use crate::error::Result;
use crate::stream::{ReadStream, WriteStream};
use std::io::{Read, Write};

pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;

pub trait Backend: Send + Sync {
    /// Open `name` for reading.
    ///
    /// When `checksum` is given the contents are verified before this
    /// returns, and a mismatch is an error rather than a stream.
    fn open_for_read(&self, name: &str, checksum: Option<&Digest>) -> Result<ReadStream>;

    /// Create or truncate `name`. Nothing is visible until the stream is
    /// finalized.
    fn open_for_write(&self, name: &str) -> Result<WriteStream>;

    /// Human-readable root, for logs.
    fn describe(&self) -> String;

    /// Copy `source` into `name` in blocks of `block_size` bytes.
    fn write_from_stream(&self, name: &str, source: &mut dyn Read, block_size: usize) -> Result<()> {
        let mut dest = self.open_for_write(name)?;
        let mut buf = vec![0u8; block_size.max(1)];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            dest.write_all(&buf[..n])?;
        }
        dest.finalize()
    }

    /// Read all of `name`, verified when `checksum` is given.
    fn read_bytes(&self, name: &str, checksum: Option<&Digest>) -> Result<Vec<u8>> {
        Ok(self.open_for_read(name, checksum)?.into_bytes()?)
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn open_for_read(&self, name: &str, checksum: Option<&Digest>) -> Result<ReadStream> {
        (**self).open_for_read(name, checksum)
    }
    fn open_for_write(&self, name: &str) -> Result<WriteStream> {
        (**self).open_for_write(name)
    }
    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    fn open_for_read(&self, name: &str, checksum: Option<&Digest>) -> Result<ReadStream> {
        (**self).open_for_read(name, checksum)
    }
    fn open_for_write(&self, name: &str) -> Result<WriteStream> {
        (**self).open_for_write(name)
    }
    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// All supported storage backends.
pub enum AnyBackend {
    Disk(DiskBackend),
    Http(HttpBackend),
    ObjectStore(ObjectStoreBackend),
    /// One of the above behind a shared content cache.
    Cached(Box<CachingBackend<AnyBackend>>),
}

impl AnyBackend {
    fn inner(&self) -> &dyn Backend {
        match self {
            Self::Disk(b) => b,
            Self::Http(b) => b,
            Self::ObjectStore(b) => b,
            Self::Cached(b) => &**b,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

impl Backend for AnyBackend {
    fn open_for_read(&self, name: &str, checksum: Option<&Digest>) -> Result<ReadStream> {
        self.inner().open_for_read(name, checksum)
    }

    fn open_for_write(&self, name: &str) -> Result<WriteStream> {
        self.inner().open_for_write(name)
    }

    fn describe(&self) -> String {
        self.inner().describe()
    }
}

impl std::fmt::Debug for AnyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Disk(_) => "Disk",
            Self::Http(_) => "Http",
            Self::ObjectStore(_) => "ObjectStore",
            Self::Cached(_) => "Cached",
        };
        write!(f, "{}({})", kind, self.describe())
    }
}
