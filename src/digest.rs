//! SHA-256 content digests.
//!
//! Tiles carry their checksum in the manifest as 64 hex digits. That text is
//! parsed into a [`Digest`] once, at the edge, so everything downstream
//! compares fixed-size values instead of strings.
//!
//! ```
//! use slicestore::digest::Digest;
//!
//! let d = Digest::from("Hello world!");
//! let parsed = Digest::from_hex(&d.to_hex().to_uppercase())?;
//! assert_eq!(d, parsed);
//! # Ok::<(), slicestore::Error>(())
//! ```

use crate::error::{Error, Result};
use sha2::{Digest as UpstreamDigest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const DIGEST_LENGTH: usize = 256 / 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    bytes: [u8; DIGEST_LENGTH],
}

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Parse a hex digest. Either case is accepted.
    pub fn from_hex(text: impl AsRef<str>) -> Result<Self> {
        let text = text.as_ref();
        let mut bytes = [0u8; DIGEST_LENGTH];
        hex::decode_to_slice(text.trim(), &mut bytes).map_err(|_| Error::InvalidChecksum {
            value: text.to_owned(),
        })?;
        Ok(Self { bytes })
    }

    /// Canonical lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.bytes
    }
}

impl<T> From<T> for Digest
where
    T: AsRef<[u8]>,
{
    fn from(item: T) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(item);
        hasher.finish()
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Streaming accumulator for data that arrives in blocks.
#[derive(Default)]
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, bytes: impl AsRef<[u8]>) {
        self.0.update(bytes);
    }

    pub fn finish(self) -> Digest {
        Digest::from_bytes(self.0.finalize().into())
    }
}
