//! Verify a seekable stream against an expected SHA-256 digest.
//!
//! ```
//! use std::io::Cursor;
//! use slicestore::checksum::verify;
//! use slicestore::digest::Digest;
//!
//! let mut buf = Cursor::new(b"tile bytes".to_vec());
//! verify(&mut buf, Some(&Digest::from("tile bytes")))?;
//! verify(&mut buf, None)?;
//! # Ok::<(), slicestore::Error>(())
//! ```

use crate::digest::{Digest, Hasher};
use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

pub const BLOCK_SIZE: usize = 64 * 1024;

/// Hash `stream` to exhaustion and compare against `expected`.
///
/// With no expected digest this is a no-op and the stream is not touched.
/// Otherwise the stream must be at its start. It is rewound to the start
/// before returning, whether or not the digests match.
pub fn verify<R>(stream: &mut R, expected: Option<&Digest>) -> Result<()>
where
    R: Read + Seek,
{
    let Some(expected) = expected else {
        return Ok(());
    };
    assert_eq!(
        stream.stream_position()?,
        0,
        "checksum verification must start at the beginning of the stream"
    );

    let computed = digest_stream(stream);
    stream.seek(SeekFrom::Start(0))?;
    let computed = computed?;

    if &computed != expected {
        return Err(Error::ChecksumMismatch {
            computed,
            expected: *expected,
        });
    }
    Ok(())
}

/// Digest everything remaining in `reader`.
pub fn digest_stream(reader: &mut impl Read) -> Result<Digest> {
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}
