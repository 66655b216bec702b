//! Turning a reference into a backend plus an object name.
//!
//! ```
//! use slicestore::resolve::Resolver;
//!
//! let resolver = Resolver::default();
//! let r = resolver.resolve("file.json", Some("https://example.com/dir"))?;
//! assert_eq!(r.name, "file.json");
//! assert_eq!(r.base.as_str(), "https://example.com/dir");
//! # Ok::<(), slicestore::Error>(())
//! ```

use crate::backend::{
    AnyBackend, CachingBackend, DiskBackend, HttpBackend, ObjectClient, ObjectStoreBackend, S3Client,
};
use crate::config::{BackendConfig, HttpConfig};
use crate::error::{Error, Result};
use crate::reference;
use crate::registry::CacheRegistry;
use reqwest::blocking::Client;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use url::Url;

/// What a reference resolved to.
#[derive(Debug)]
pub struct Resolved {
    pub backend: AnyBackend,
    /// Object name relative to `base`.
    pub name: String,
    pub base: Url,
}

/// Resolves references to backends.
///
/// Every backend handed out by one resolver shares a single HTTP client, and
/// `s3:` backends share a single [`ObjectClient`]. Both are built on first use.
#[derive(Default)]
pub struct Resolver {
    config: BackendConfig,
    http: HttpConfig,
    registry: Arc<CacheRegistry>,
    client: OnceLock<Client>,
    object_client: OnceLock<Arc<dyn ObjectClient>>,
}

impl Resolver {
    pub fn new(config: BackendConfig, registry: Arc<CacheRegistry>) -> Self {
        Self {
            config,
            registry,
            ..Self::default()
        }
    }

    pub fn with_http_config(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self.client = OnceLock::new();
        self
    }

    /// Serve `s3:` references through `client` instead of S3 itself.
    pub fn with_object_client(mut self, client: Arc<dyn ObjectClient>) -> Self {
        self.object_client = OnceLock::from(client);
        self
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    /// Resolve a name (relative to `base`) or an absolute reference.
    pub fn resolve(&self, name_or_reference: &str, base: Option<&str>) -> Result<Resolved> {
        let (name, base) = reference::absolute(name_or_reference, base)?;
        let backend = self.backend_for(&base)?;
        Ok(Resolved {
            backend,
            name,
            base,
        })
    }

    /// Like [`Resolver::resolve`] without a base, but a plain path to an
    /// existing local file is accepted too.
    pub fn resolve_path_or_reference(&self, path_or_reference: &str) -> Result<Resolved> {
        match self.resolve(path_or_reference, None) {
            Ok(r) => Ok(r),
            Err(
                e @ (Error::MissingBase { .. }
                | Error::InvalidReference { .. }
                | Error::UnsupportedScheme { .. }),
            ) => {
                let path = Path::new(path_or_reference);
                if !path.is_file() {
                    tracing::debug!(path_or_reference, "not a reference or a file: {e}");
                    return Err(Error::NotFound {
                        name: path_or_reference.to_owned(),
                    });
                }
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    return Err(Error::InvalidReference {
                        reference: path_or_reference.to_owned(),
                        reason: "file name is not valid UTF-8".into(),
                    });
                };
                let parent = match path.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p,
                    _ => Path::new("."),
                };
                let base = reference::file_reference(parent)?;
                self.resolve(file_name, Some(base.as_str()))
            }
            Err(e) => Err(e),
        }
    }

    fn backend_for(&self, base: &Url) -> Result<AnyBackend> {
        let backend = match base.scheme() {
            "file" => {
                let root = reference::local_path(base)?;
                tracing::debug!(root = %root.display(), "selected disk backend");
                return Ok(AnyBackend::Disk(DiskBackend::new(root)));
            }
            "http" | "https" => {
                AnyBackend::Http(HttpBackend::with_client(base.clone(), self.http_client()?, self.http.retry))
            }
            "s3" => AnyBackend::ObjectStore(ObjectStoreBackend::from_reference(base, self.object_client()?)?),
            other => {
                return Err(Error::UnsupportedScheme {
                    scheme: other.to_owned(),
                    reference: base.to_string(),
                })
            }
        };
        tracing::debug!(backend = ?backend, "selected backend");

        let Some(dir) = self.config.cache_directory() else {
            return Ok(backend);
        };
        let size_limit = self.config.caching.size_limit;
        if self.config.caching.debug {
            tracing::info!("> caching {} to {} (size_limit: {})", base, dir.display(), size_limit);
        }
        let cached = CachingBackend::new(&self.registry, &dir, size_limit, backend)?;
        Ok(AnyBackend::Cached(Box::new(cached)))
    }

    fn http_client(&self) -> Result<Client> {
        if let Some(c) = self.client.get() {
            return Ok(c.clone());
        }
        let built = self.http.client()?;
        Ok(self.client.get_or_init(|| built).clone())
    }

    fn object_client(&self) -> Result<Arc<dyn ObjectClient>> {
        if let Some(c) = self.object_client.get() {
            return Ok(c.clone());
        }
        let s3 = S3Client::from_env_with_client(&self.config.s3, self.http_client()?, self.http.retry)?;
        let built: Arc<dyn ObjectClient> = Arc::new(s3);
        Ok(self.object_client.get_or_init(|| built).clone())
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("http", &self.http)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::{Backend, MemoryObjectClient};
    use crate::cli::DEFAULT_LOG_FILTER;
    use crate::digest::Digest;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::EnvFilter;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;
        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Resolve `reference` with the binary's default log filter in place and
    /// return everything that was logged.
    fn logged_while_resolving(resolver: &Resolver, reference: &str) -> String {
        let out = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(DEFAULT_LOG_FILTER))
            .with_writer(out.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || resolver.resolve(reference, None).unwrap());
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn cached_resolver(dir: &Path) -> Resolver {
        let config = BackendConfig::default().with_cache_directory(dir);
        Resolver::new(config, Arc::new(CacheRegistry::new()))
    }

    #[test]
    fn absolute_http() -> Result<()> {
        let r = Resolver::default().resolve("https://example.com/dir/file.json", None)?;
        assert_eq!(r.name, "file.json");
        assert_eq!(r.base.as_str(), "https://example.com/dir");
        assert!(matches!(r.backend, AnyBackend::Http(_)));
        Ok(())
    }

    #[test]
    fn relative_http() -> Result<()> {
        let r = Resolver::default().resolve("file.json", Some("https://example.com/dir"))?;
        assert_eq!(r.name, "file.json");
        assert_eq!(r.base.as_str(), "https://example.com/dir");
        Ok(())
    }

    #[test]
    fn missing_base() {
        assert!(matches!(
            Resolver::default().resolve("x", None),
            Err(Error::MissingBase { .. })
        ));
    }

    #[test]
    fn unsupported_scheme() {
        match Resolver::default().resolve("ftp://example.com/x", None) {
            Err(Error::UnsupportedScheme { scheme, .. }) => assert_eq!(scheme, "ftp"),
            other => panic!("expected UnsupportedScheme, got {:?}", other),
        }
    }

    #[test]
    fn file_scheme_is_never_cached() -> Result<()> {
        let data = tempdir()?;
        let cache = tempdir()?;
        std::fs::write(data.path().join("t.npy"), b"tile")?;
        let url = reference::file_reference(&data.path().join("t.npy"))?;

        let r = cached_resolver(cache.path()).resolve(url.as_str(), None)?;
        assert!(matches!(r.backend, AnyBackend::Disk(_)));
        assert_eq!(r.name, "t.npy");
        assert_eq!(r.backend.read_bytes(&r.name, Some(&Digest::from("tile")))?, b"tile");
        Ok(())
    }

    #[test]
    fn remote_schemes_are_cached() -> Result<()> {
        let cache = tempdir()?;
        let resolver = cached_resolver(cache.path());
        let r = resolver.resolve("http://example.com/a/b", None)?;
        assert!(r.backend.is_cached());
        assert_eq!(resolver.registry().len(), 1);

        // A second resolution shares the store.
        resolver.resolve("http://example.org/c", None)?;
        assert_eq!(resolver.registry().len(), 1);
        Ok(())
    }

    #[test]
    fn cache_debug_line_is_shown_by_default() -> Result<()> {
        let cache = tempdir()?;
        let mut config = BackendConfig::default().with_cache_directory(cache.path());
        config.caching.debug = true;
        let resolver = Resolver::new(config.clone(), Arc::new(CacheRegistry::new()));
        let text = logged_while_resolving(&resolver, "http://example.com/run/t.npy");
        assert!(text.contains("> caching http://example.com/run to "), "{}", text);
        assert!(text.contains("(size_limit: 5000000000)"), "{}", text);

        config.caching.debug = false;
        let resolver = Resolver::new(config, Arc::new(CacheRegistry::new()));
        assert!(!logged_while_resolving(&resolver, "http://example.com/run/t.npy").contains("> caching"));
        Ok(())
    }

    #[test]
    fn transport_is_built_once() -> Result<()> {
        let resolver = Resolver::default();
        assert!(resolver.client.get().is_none());
        resolver.resolve("http://example.com/a/t0.npy", None)?;
        resolver.resolve("https://example.org/b/t1.npy", None)?;
        assert!(resolver.client.get().is_some());

        let client_of = |reference: &str| match resolver.resolve(reference, None) {
            Ok(Resolved {
                backend: AnyBackend::ObjectStore(store),
                ..
            }) => store.client().clone(),
            other => panic!("expected an object store, got {:?}", other),
        };
        let a = client_of("s3://bucket/run/t0.npy");
        let b = client_of("s3://other/run/t1.npy");
        assert!(Arc::ptr_eq(&a, &b));
        Ok(())
    }

    #[test]
    fn zero_size_limit_disables_cache() -> Result<()> {
        let cache = tempdir()?;
        let mut config = BackendConfig::default().with_cache_directory(cache.path());
        config.caching.size_limit = 0;
        let resolver = Resolver::new(config, Arc::new(CacheRegistry::new()));
        let r = resolver.resolve("http://example.com/a/b", None)?;
        assert!(!r.backend.is_cached());
        Ok(())
    }

    #[test]
    fn object_store_through_client() -> Result<()> {
        let client = Arc::new(MemoryObjectClient::new());
        client.put("bucket", "run/fov/t0.npy", b"pixels".to_vec())?;
        let resolver = Resolver::default().with_object_client(client);

        let r = resolver.resolve("fov/t0.npy", Some("s3://bucket/run"))?;
        assert_eq!(r.base.as_str(), "s3://bucket/run/fov");
        assert_eq!(r.name, "t0.npy");
        assert_eq!(r.backend.read_bytes(&r.name, None)?, b"pixels");

        let r = resolver.resolve("s3://bucket/run/fov/t0.npy", None)?;
        assert!(matches!(r.backend, AnyBackend::ObjectStore(_)));
        assert_eq!(r.backend.read_bytes(&r.name, Some(&Digest::from("pixels")))?, b"pixels");
        Ok(())
    }

    #[test]
    fn plain_path() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, b"{}")?;
        let text = path.to_str().unwrap_or_default();

        let r = Resolver::default().resolve_path_or_reference(text)?;
        assert_eq!(r.name, "manifest.json");
        assert_eq!(r.base.scheme(), "file");
        assert_eq!(r.backend.read_bytes("manifest.json", None)?, b"{}");
        Ok(())
    }

    #[test]
    fn plain_path_missing() {
        assert!(matches!(
            Resolver::default().resolve_path_or_reference("/definitely/not/here.json"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn reference_takes_priority() -> Result<()> {
        let r = Resolver::default().resolve_path_or_reference("https://example.com/dir/file.json")?;
        assert_eq!(r.name, "file.json");
        Ok(())
    }
}
