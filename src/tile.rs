//! Tile records as they appear in a manifest, and lazily loaded tile data.

use crate::backend::Backend;
use crate::digest::Digest;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::{Arc, Mutex};
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageFormat {
    Tiff,
    Numpy,
    Png,
}

impl ImageFormat {
    pub fn file_ext(&self) -> &'static str {
        match self {
            Self::Tiff => "tiff",
            Self::Numpy => "npy",
            Self::Png => "png",
        }
    }

    pub fn alternate_extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Tiff => &["tif"],
            Self::Numpy | Self::Png => &[],
        }
    }

    /// Case-insensitive lookup by file extension, without the dot.
    pub fn find_by_extension(ext: &str) -> Option<Self> {
        Self::iter().find(|f| {
            f.file_ext().eq_ignore_ascii_case(ext)
                || f.alternate_extensions().iter().any(|a| a.eq_ignore_ascii_case(ext))
        })
    }
}

/// The fields of a manifest tile entry that locate and verify its data.
/// Other keys in the entry are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRef {
    /// Name relative to the manifest, or an absolute reference.
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_format: Option<ImageFormat>,
}

impl TileRef {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            sha256: None,
            tile_format: None,
        }
    }

    pub fn with_sha256(mut self, digest: &Digest) -> Self {
        self.sha256 = Some(digest.to_hex());
        self
    }

    pub fn checksum(&self) -> Result<Option<Digest>> {
        self.sha256.as_deref().map(Digest::from_hex).transpose()
    }

    /// The explicit format, else `default`, else whatever the extension says.
    pub fn format(&self, default: Option<ImageFormat>) -> Result<ImageFormat> {
        if let Some(f) = self.tile_format.or(default) {
            return Ok(f);
        }
        let ext = self.file.rsplit_once('.').map(|(_, e)| e).unwrap_or_default();
        ImageFormat::find_by_extension(ext).ok_or_else(|| Error::InvalidReference {
            reference: self.file.clone(),
            reason: format!("no tile format matches extension {:?}", ext),
        })
    }
}

type Decoder<T> = Box<dyn Fn(&mut dyn Read) -> Result<T> + Send + Sync>;

/// Tile data that is fetched, verified and decoded on first use.
///
/// Concurrent callers of [`LazyTile::get`] wait for a single load. A failed
/// load leaves the tile unloaded, so the next call tries again.
pub struct LazyTile<T> {
    backend: Arc<dyn Backend>,
    name: String,
    checksum: Option<Digest>,
    decode: Decoder<T>,
    value: Mutex<Option<Arc<T>>>,
}

impl<T> LazyTile<T> {
    pub fn new(
        backend: Arc<dyn Backend>,
        name: impl Into<String>,
        checksum: Option<Digest>,
        decode: impl Fn(&mut dyn Read) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            backend,
            name: name.into(),
            checksum,
            decode: Box::new(decode),
            value: Mutex::new(None),
        }
    }

    /// The recorded checksum. Never fetches anything.
    pub fn checksum(&self) -> Option<&Digest> {
        self.checksum.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.slot().is_some()
    }

    pub fn get(&self) -> Result<Arc<T>> {
        let mut slot = self.slot();
        if let Some(v) = slot.as_ref() {
            return Ok(v.clone());
        }
        let mut stream = self.backend.open_for_read(&self.name, self.checksum.as_ref())?;
        let value = Arc::new((self.decode)(&mut stream)?);
        *slot = Some(value.clone());
        Ok(value)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<T>>> {
        self.value.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<T> std::fmt::Debug for LazyTile<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyTile")
            .field("name", &self.name)
            .field("checksum", &self.checksum)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
