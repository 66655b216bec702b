//! Objects stored as plain files under a local directory.
//!
//! Every read opens its own OS file handle, so concurrent readers of the
//! same tile do not share offsets. Writes go to a temp file beside the
//! destination and are atomically renamed into place on finalize.

use super::Backend;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::stream::{ReadStream, Sink, WriteStream};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Backend for DiskBackend {
    fn open_for_read(&self, name: &str, checksum: Option<&Digest>) -> Result<ReadStream> {
        let path = self.path_of(name);
        let mut f = std::fs::File::open(&path).map_err(|e| Error::from_io(name, e))?;
        if checksum.is_none() {
            return Ok(ReadStream::from_file(f));
        }

        // Buffer so the bytes we verify are the bytes the caller reads, even
        // if the file is rewritten in the meantime.
        let mut bytes = vec![];
        f.read_to_end(&mut bytes)?;
        ReadStream::verified(bytes, checksum)
    }

    fn open_for_write(&self, name: &str) -> Result<WriteStream> {
        let dest = self.path_of(name);
        let dir = dest.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir)?;
        let file = NamedTempFile::new_in(dir)?;
        Ok(WriteStream::new(name, DiskSink { file, dest }))
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

struct DiskSink {
    file: NamedTempFile,
    dest: PathBuf,
}

impl Write for DiskSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Sink for DiskSink {
    fn finalize(self: Box<Self>) -> Result<()> {
        let DiskSink { file, dest } = *self;
        file.as_file().sync_all()?;
        match file.persist(&dest) {
            Ok(_) => Ok(()),
            Err(pe) => Err(pe.error.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn fixture() -> Result<(tempfile::TempDir, DiskBackend)> {
        let dir = tempdir()?;
        let disk = DiskBackend::new(dir.path());
        Ok((dir, disk))
    }

    #[test]
    fn round_trip() -> Result<()> {
        let (_dir, disk) = fixture()?;
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        disk.write_from_stream("tile.npy", &mut payload.as_slice(), 1000)?;
        assert_eq!(disk.read_bytes("tile.npy", None)?, payload);
        assert_eq!(disk.read_bytes("tile.npy", Some(&Digest::from(&payload)))?, payload);
        Ok(())
    }

    #[test]
    fn nested_names() -> Result<()> {
        let (dir, disk) = fixture()?;
        disk.write_from_stream("fov_001/hyb_0/tile.npy", &mut &b"xyz"[..], 2)?;
        assert_eq!(std::fs::read(dir.path().join("fov_001/hyb_0/tile.npy"))?, b"xyz");
        Ok(())
    }

    #[test]
    fn checksum_mismatch() -> Result<()> {
        let (dir, disk) = fixture()?;
        std::fs::write(dir.path().join("t"), b"actual")?;
        match disk.open_for_read("t", Some(&Digest::from("claimed"))) {
            Err(Error::ChecksumMismatch { computed, expected }) => {
                assert_eq!(computed, Digest::from("actual"));
                assert_eq!(expected, Digest::from("claimed"));
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn not_found() -> Result<()> {
        let (_dir, disk) = fixture()?;
        assert!(matches!(
            disk.open_for_read("missing", None),
            Err(Error::NotFound { name }) if name == "missing"
        ));
        Ok(())
    }

    #[test]
    fn reentrant() -> Result<()> {
        let (dir, disk) = fixture()?;
        let data = b"independent handles".to_vec();
        std::fs::write(dir.path().join("t"), &data)?;

        for checksum in [None, Some(Digest::from(&data))] {
            let mut a = disk.open_for_read("t", checksum.as_ref())?;
            let mut head = [0u8; 1];
            a.read_exact(&mut head)?;
            let b = disk.open_for_read("t", checksum.as_ref())?.into_bytes()?;
            let mut rest = vec![];
            a.read_to_end(&mut rest)?;

            assert_eq!(b, data);
            assert_eq!([&head[..], &rest[..]].concat(), data);
        }
        Ok(())
    }

    #[test]
    fn unfinalized_write_leaves_nothing() -> Result<()> {
        let (dir, disk) = fixture()?;
        let mut w = disk.open_for_write("t")?;
        w.write_all(b"half a tile")?;
        drop(w);
        assert!(!dir.path().join("t").exists());
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn write_truncates() -> Result<()> {
        let (_dir, disk) = fixture()?;
        disk.write_from_stream("t", &mut &b"a much longer first version"[..], 8)?;
        disk.write_from_stream("t", &mut &b"short"[..], 8)?;
        assert_eq!(disk.read_bytes("t", None)?, b"short");
        Ok(())
    }
}
