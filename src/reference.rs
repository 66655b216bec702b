//! Arithmetic on references: absolute URLs, or names relative to one.
//!
//! A manifest names its tiles relative to wherever the manifest itself
//! lives. These helpers turn such names into absolute URLs, split an
//! absolute URL into (base, name), and go back the other way when writing.
//!
//! ```
//! use slicestore::reference::{absolute, relativize};
//!
//! let (name, base) = absolute("abc/def", Some("https://github.com/"))?;
//! assert_eq!(name, "def");
//! assert_eq!(base.as_str(), "https://github.com/abc");
//!
//! assert_eq!(relativize("http://example.com/abc", "http://example.com/dir/def")?, "dir/def");
//! # Ok::<(), slicestore::Error>(())
//! ```

use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use url::Url;

/// Parse `text` if it is an absolute reference (has a scheme).
pub fn parse_absolute(text: &str) -> Option<Url> {
    match Url::parse(text) {
        Ok(u) if !u.scheme().is_empty() => Some(u),
        _ => None,
    }
}

/// Append path segments to `base` with POSIX join rules: a segment starting
/// with `/` replaces everything before it.
pub fn join(base: &Url, segment: &str) -> Url {
    let mut joined = base.clone();
    joined.set_path(&posix_join(base.path(), segment));
    joined
}

fn posix_join(a: &str, b: &str) -> String {
    if b.starts_with('/') || a.is_empty() {
        b.to_owned()
    } else if a.ends_with('/') {
        format!("{}{}", a, b)
    } else {
        format!("{}/{}", a, b)
    }
}

/// Split an absolute URL into the decoded basename and the URL of its
/// directory. Query and fragment stay on the directory URL.
pub fn split(url: &Url) -> (String, Url) {
    let path = url.path();
    let (dir, base) = match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    };
    let name = percent_decode_str(base).decode_utf8_lossy().into_owned();
    let mut dir_url = url.clone();
    dir_url.set_path(dir);
    (name, dir_url)
}

/// Resolve a name or absolute reference into `(name, base)`.
///
/// An absolute reference ignores `base`. A relative one is joined onto
/// `base`, which must then be present.
pub fn absolute(name_or_reference: &str, base: Option<&str>) -> Result<(String, Url)> {
    if let Some(url) = parse_absolute(name_or_reference) {
        return Ok(split(&url));
    }
    let base = base.ok_or_else(|| Error::MissingBase {
        reference: name_or_reference.to_owned(),
    })?;
    let base_url = parse_absolute(base).ok_or_else(|| Error::InvalidReference {
        reference: base.to_owned(),
        reason: "base reference is not absolute".into(),
    })?;
    Ok(split(&join(&base_url, name_or_reference)))
}

/// Express `name_or_reference` relative to the directory of `base` when
/// possible, otherwise as an absolute URL.
pub fn relativize(base: &str, name_or_reference: &str) -> Result<String> {
    let (name, new_base) = absolute(name_or_reference, Some(base))?;
    let target = join(&new_base, &name);
    let base_url = parse_absolute(base).ok_or_else(|| Error::InvalidReference {
        reference: base.to_owned(),
        reason: "base reference is not absolute".into(),
    })?;

    let same_authority = base_url.host_str() == target.host_str()
        && base_url.port_or_known_default() == target.port_or_known_default();
    if base_url.scheme() != target.scheme() || !same_authority {
        return Ok(target.into());
    }

    let base_dir = {
        let mut parts = components(base_url.path());
        parts.pop();
        parts
    };
    let target_parts = components(target.path());
    if !target_parts.starts_with(&base_dir) {
        return Ok(target.into());
    }

    let rest = &target_parts[base_dir.len()..];
    let mut result = if rest.is_empty() {
        ".".to_owned()
    } else {
        rest.join("/")
    };
    if let Some(q) = target.query() {
        result.push('?');
        result.push_str(q);
    }
    if let Some(f) = target.fragment() {
        result.push('#');
        result.push_str(f);
    }
    Ok(result)
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".").collect()
}

/// Local filesystem path named by a `file:` URL.
pub fn local_path(url: &Url) -> Result<PathBuf> {
    url.to_file_path().map_err(|_| Error::InvalidReference {
        reference: url.to_string(),
        reason: "not a local file reference".into(),
    })
}

/// `file:` URL for a local path, made absolute against the working directory.
pub fn file_reference(path: &Path) -> Result<Url> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Url::from_file_path(&abs).map_err(|_| Error::InvalidReference {
        reference: abs.display().to_string(),
        reason: "cannot be expressed as a file URL".into(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn rel(base: &str, target: &str) -> String {
        relativize(base, target).expect("relativize")
    }

    #[test]
    fn fully_qualified() -> Result<()> {
        let (name, base) = absolute("https://github.com/abc/def", None)?;
        assert_eq!(name, "def");
        assert_eq!(base.as_str(), "https://github.com/abc");

        // The base is ignored for absolute references.
        let (name, base) = absolute("https://github.com/abc/def", Some("https://github.io"))?;
        assert_eq!(name, "def");
        assert_eq!(base.as_str(), "https://github.com/abc");
        Ok(())
    }

    #[test]
    fn relative() -> Result<()> {
        let (name, base) = absolute("def", Some("https://github.com/abc"))?;
        assert_eq!(name, "def");
        assert_eq!(base.as_str(), "https://github.com/abc");

        let (name, base) = absolute("abc/def", Some("https://github.com/"))?;
        assert_eq!(name, "def");
        assert_eq!(base.as_str(), "https://github.com/abc");
        Ok(())
    }

    #[test]
    fn relative_without_base() {
        assert!(matches!(absolute("x", None), Err(Error::MissingBase { .. })));
    }

    #[test]
    fn relative_with_relative_base() {
        assert!(matches!(
            absolute("x", Some("also/relative")),
            Err(Error::InvalidReference { .. })
        ));
    }

    #[test]
    fn names_are_decoded() -> Result<()> {
        let (name, base) = absolute("http://example.com/a%20dir/tile%201.tiff", None)?;
        assert_eq!(name, "tile 1.tiff");
        assert_eq!(base.as_str(), "http://example.com/a%20dir");
        Ok(())
    }

    #[test]
    fn query_stays_on_base() -> Result<()> {
        let (name, base) = absolute("https://example.com/dir/file.json?sig=abc", None)?;
        assert_eq!(name, "file.json");
        assert_eq!(base.as_str(), "https://example.com/dir?sig=abc");
        assert_eq!(
            join(&base, "tile.npy").as_str(),
            "https://example.com/dir/tile.npy?sig=abc"
        );
        Ok(())
    }

    #[test]
    fn join_rules() {
        let base = Url::parse("s3://bucket/prefix").unwrap();
        assert_eq!(join(&base, "a/b").as_str(), "s3://bucket/prefix/a/b");
        assert_eq!(join(&base, "/rooted").as_str(), "s3://bucket/rooted");
        let root = Url::parse("http://0.0.0.0:8000").unwrap();
        assert_eq!(join(&root, "t.npy").as_str(), "http://0.0.0.0:8000/t.npy");
    }

    #[test]
    fn relativize_same_level() {
        assert_eq!(rel("http://example.com/abc", "http://example.com/def"), "def");
        assert_eq!(rel("http://example.com/dir/abc", "http://example.com/dir/def"), "def");
        assert_eq!(rel("http://example.com/abc;ab", "http://example.com/def;de"), "def;de");
        assert_eq!(rel("http://example.com/abc?ab", "http://example.com/def?de"), "def?de");
        assert_eq!(rel("http://example.com/abc#ab", "http://example.com/def#de"), "def#de");
    }

    #[test]
    fn relativize_nested() {
        assert_eq!(rel("http://example.com/abc", "http://example.com/dir/def"), "dir/def");
        assert_eq!(
            rel("http://example.com/dir/abc", "http://example.com/def"),
            "http://example.com/def"
        );
    }

    #[test]
    fn relativize_different_origin() {
        assert_eq!(
            rel("http://example.com/abc", "https://example.com/dir/def"),
            "https://example.com/dir/def"
        );
        assert_eq!(
            rel("http://example.com/abc", "http://example.org/def"),
            "http://example.org/def"
        );
    }

    #[test]
    fn relativize_other_schemes() {
        assert_eq!(rel("s3://bucket/run/manifest.json", "s3://bucket/run/fov/t0.npy"), "fov/t0.npy");
        assert_eq!(rel("file:///data/manifest.json", "file:///data/t0.npy"), "t0.npy");
    }

    #[test]
    fn file_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let url = file_reference(dir.path())?;
        assert_eq!(url.scheme(), "file");
        assert_eq!(local_path(&url)?, dir.path());
        Ok(())
    }

    #[test]
    fn local_path_rejects_http() {
        let url = Url::parse("http://example.com/x").unwrap();
        assert!(matches!(local_path(&url), Err(Error::InvalidReference { .. })));
    }
}
