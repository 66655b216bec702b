//! Every way a fetch or a resolution can fail.
//!
//! Kinds are kept distinct so callers can decide between retrying and
//! giving up without string matching.

use crate::digest::Digest;

pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object {name:?} not found")]
    NotFound { name: String },

    #[error("no backend handles scheme {scheme:?} (in {reference:?})")]
    UnsupportedScheme { scheme: String, reference: String },

    #[error("{reference:?} is relative and no base reference was given")]
    MissingBase { reference: String },

    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("transport failure for {target}{}", status_suffix(.status))]
    Transport {
        target: String,
        status: Option<u16>,
        #[source]
        source: Option<Cause>,
    },

    #[error("checksum mismatch: computed {computed}, expected {expected}")]
    ChecksumMismatch { computed: Digest, expected: Digest },

    #[error("{value:?} is not a hex-encoded sha256 digest")]
    InvalidChecksum { value: String },

    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },

    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {})", code),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn transport(target: impl Into<String>, status: Option<u16>) -> Self {
        Error::Transport {
            target: target.into(),
            status,
            source: None,
        }
    }

    pub(crate) fn transport_cause(
        target: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Transport {
            target: target.into(),
            status: None,
            source: Some(Box::new(cause)),
        }
    }

    /// Map an I/O error on a named object, keeping `NotFound` distinct.
    pub(crate) fn from_io(name: impl Into<String>, e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound { name: name.into() },
            _ => Error::Io(e),
        }
    }

    /// Whether repeating the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { status: None, .. } => true,
            Error::Transport {
                status: Some(code), ..
            } => crate::retry::RETRY_STATUS_CODES.contains(code),
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_transport() {
        let e = Error::transport("http://example.com/x", Some(503));
        assert_eq!(
            e.to_string(),
            "transport failure for http://example.com/x (status 503)"
        );
        let e = Error::transport("http://example.com/x", None);
        assert_eq!(e.to_string(), "transport failure for http://example.com/x");
    }

    #[test]
    fn display_mismatch_names_both_digests() {
        let computed = Digest::from("a");
        let expected = Digest::from("b");
        let text = Error::ChecksumMismatch { computed, expected }.to_string();
        assert!(text.contains(&computed.to_hex()));
        assert!(text.contains(&expected.to_hex()));
    }

    #[test]
    fn from_io_keeps_not_found() {
        let e = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(Error::from_io("tile", e), Error::NotFound { name } if name == "tile"));
        let e = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(Error::from_io("tile", e), Error::Io(_)));
    }

    #[test]
    fn retryable() {
        assert!(Error::transport("x", Some(502)).is_retryable());
        assert!(Error::transport("x", None).is_retryable());
        assert!(!Error::transport("x", Some(403)).is_retryable());
        assert!(!Error::NotFound { name: "x".into() }.is_retryable());
    }
}
