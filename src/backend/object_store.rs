//! Objects stored under a bucket and key prefix.
//!
//! The transport is an [`ObjectClient`]. [`S3Client`] talks to S3 (or
//! anything S3-compatible) over its REST API, either anonymously or with
//! SigV4 query-string signing. [`MemoryObjectClient`] keeps everything in a
//! map, which is handy for tests and for staging writes.
//!
//! Whole objects are downloaded into memory before verification.

use super::Backend;
use crate::config::{HttpConfig, S3Config};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::retry::{check_status, RetryPolicy};
use crate::stream::{ReadStream, Sink, WriteStream};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::sync::{Arc, RwLock};
use url::Url;

pub trait ObjectClient: Send + Sync {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;
}

#[derive(Clone)]
pub struct ObjectStoreBackend {
    bucket: String,
    prefix: String,
    client: Arc<dyn ObjectClient>,
}

impl ObjectStoreBackend {
    pub fn new(bucket: impl Into<String>, prefix: impl AsRef<str>, client: Arc<dyn ObjectClient>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: normalize_key(prefix.as_ref()),
            client,
        }
    }

    /// Backend for an `s3://bucket/prefix` reference.
    pub fn from_reference(url: &Url, client: Arc<dyn ObjectClient>) -> Result<Self> {
        let bucket = match url.host_str() {
            Some(b) if !b.is_empty() => b.to_owned(),
            _ => {
                return Err(Error::InvalidReference {
                    reference: url.to_string(),
                    reason: "object store reference has no bucket".into(),
                })
            }
        };
        Ok(Self::new(bucket, url.path(), client))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }

    fn key_for(&self, name: &str) -> String {
        if name.starts_with('/') || self.prefix.is_empty() {
            normalize_key(name)
        } else {
            normalize_key(&format!("{}/{}", self.prefix, name))
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

impl Backend for ObjectStoreBackend {
    fn open_for_read(&self, name: &str, checksum: Option<&Digest>) -> Result<ReadStream> {
        let key = self.key_for(name);
        tracing::debug!(bucket = %self.bucket, %key, "object store read");
        let bytes = self.client.get(&self.bucket, &key)?;
        ReadStream::verified(bytes, checksum)
    }

    fn open_for_write(&self, name: &str) -> Result<WriteStream> {
        let sink = ObjectSink {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: self.key_for(name),
            buf: vec![],
        };
        Ok(WriteStream::new(name, sink))
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }
}

struct ObjectSink {
    client: Arc<dyn ObjectClient>,
    bucket: String,
    key: String,
    buf: Vec<u8>,
}

impl Write for ObjectSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for ObjectSink {
    fn finalize(self: Box<Self>) -> Result<()> {
        let ObjectSink {
            client,
            bucket,
            key,
            buf,
        } = *self;
        client.put(&bucket, &key, buf)
    }
}

// ----------------------------------------------------------------------------
// In-memory client
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryObjectClient {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let mut objects = self.objects.write().unwrap_or_else(|p| p.into_inner());
        objects.remove(&(bucket.to_owned(), key.to_owned()))
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(|p| p.into_inner());
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl ObjectClient for MemoryObjectClient {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().unwrap_or_else(|p| p.into_inner());
        objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                name: format!("s3://{}/{}", bucket, key),
            })
    }

    fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let mut objects = self.objects.write().unwrap_or_else(|p| p.into_inner());
        objects.insert((bucket.to_owned(), key.to_owned()), body);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// S3 REST client
// ----------------------------------------------------------------------------

const DEFAULT_REGION: &str = "us-east-1";
const SERVICE: &str = "s3";
const PRESIGN_EXPIRES_SECONDS: u64 = 3600;

#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Credentials {
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and optionally
    /// `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Option<Self> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        Some(Self {
            access_key,
            secret_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

#[derive(Debug, Clone)]
enum Signing {
    Anonymous,
    Signed(Option<Credentials>),
}

#[derive(Debug, Clone)]
pub struct S3Client {
    http: reqwest::blocking::Client,
    retry: RetryPolicy,
    signing: Signing,
    region: String,
    /// Path-style endpoint. `None` means AWS virtual-hosted addressing.
    endpoint: Option<Url>,
}

impl S3Client {
    /// Client configured from `cfg` and the `AWS_*` environment variables.
    ///
    /// Signed mode without credentials in the environment only fails once a
    /// request is actually made.
    pub fn from_env(cfg: &S3Config, http: &HttpConfig) -> Result<Self> {
        Self::from_env_with_client(cfg, http.client()?, http.retry)
    }

    /// Like [`S3Client::from_env`], sending requests through `client`.
    pub fn from_env_with_client(
        cfg: &S3Config,
        client: reqwest::blocking::Client,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| DEFAULT_REGION.to_owned());
        let endpoint = match std::env::var("AWS_ENDPOINT_URL") {
            Ok(text) => Some(Url::parse(&text).map_err(|e| Error::Config(format!(
                "AWS_ENDPOINT_URL {:?}: {}",
                text, e
            )))?),
            Err(_) => None,
        };
        let signing = if cfg.unsigned_requests {
            Signing::Anonymous
        } else {
            Signing::Signed(Credentials::from_env())
        };
        Ok(Self {
            http: client,
            retry,
            signing,
            region,
            endpoint,
        })
    }

    pub fn anonymous(endpoint: Option<Url>, http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            http: http.client()?,
            retry: http.retry,
            signing: Signing::Anonymous,
            region: DEFAULT_REGION.to_owned(),
            endpoint,
        })
    }

    pub fn signed(
        credentials: Credentials,
        region: impl Into<String>,
        endpoint: Option<Url>,
        http: &HttpConfig,
    ) -> Result<Self> {
        Ok(Self {
            http: http.client()?,
            retry: http.retry,
            signing: Signing::Signed(Some(credentials)),
            region: region.into(),
            endpoint,
        })
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.signing, Signing::Signed(_))
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        let (mut url, path) = match &self.endpoint {
            Some(ep) => (ep.clone(), format!("/{}/{}", bucket, key)),
            None => {
                let host = format!("https://{}.s3.{}.amazonaws.com", bucket, self.region);
                let url = Url::parse(&host).map_err(|e| Error::InvalidReference {
                    reference: host.clone(),
                    reason: e.to_string(),
                })?;
                (url, format!("/{}", key))
            }
        };
        url.set_path(&uri_encode_path(&path));
        Ok(url)
    }

    fn request_url(&self, method: &str, bucket: &str, key: &str) -> Result<Url> {
        let mut url = self.object_url(bucket, key)?;
        match &self.signing {
            Signing::Anonymous => {}
            Signing::Signed(Some(creds)) => {
                presign(&mut url, method, creds, &self.region, Utc::now(), PRESIGN_EXPIRES_SECONDS)
            }
            Signing::Signed(None) => {
                return Err(Error::Credentials(
                    "signed object store requests need AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY \
                     (or set s3.unsigned_requests)"
                        .into(),
                ))
            }
        }
        Ok(url)
    }
}

impl ObjectClient for S3Client {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let url = self.request_url("GET", bucket, key)?;
        let target = format!("s3://{}/{}", bucket, key);
        self.retry.run("object store GET", || {
            let resp = self
                .http
                .get(url.clone())
                .send()
                .map_err(|e| Error::transport_cause(&target, e))?;
            check_status(&target, resp.status())?;
            let body = resp.bytes().map_err(|e| Error::transport_cause(&target, e))?;
            Ok(body.to_vec())
        })
    }

    fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let url = self.request_url("PUT", bucket, key)?;
        let target = format!("s3://{}/{}", bucket, key);
        self.retry.run("object store PUT", || {
            let resp = self
                .http
                .put(url.clone())
                .body(body.clone())
                .send()
                .map_err(|e| Error::transport_cause(&target, e))?;
            check_status(&target, resp.status())
        })
    }
}

/// Add SigV4 query-string authentication to `url`.
///
/// Only the host header is signed and the payload is `UNSIGNED-PAYLOAD`, so
/// the same URL works for any body.
fn presign(
    url: &mut Url,
    method: &str,
    creds: &Credentials,
    region: &str,
    now: DateTime<Utc>,
    expires_seconds: u64,
) {
    let date = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date, region, SERVICE);

    let mut params = BTreeMap::new();
    params.insert("X-Amz-Algorithm".to_owned(), "AWS4-HMAC-SHA256".to_owned());
    params.insert(
        "X-Amz-Credential".to_owned(),
        format!("{}/{}", creds.access_key, scope),
    );
    params.insert("X-Amz-Date".to_owned(), amz_date.clone());
    params.insert("X-Amz-Expires".to_owned(), expires_seconds.to_string());
    params.insert("X-Amz-SignedHeaders".to_owned(), "host".to_owned());
    if let Some(token) = &creds.session_token {
        params.insert("X-Amz-Security-Token".to_owned(), token.clone());
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode_value(k), uri_encode_value(v)))
        .collect::<Vec<_>>()
        .join("&");

    let host = match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{}:{}", h, p),
        (Some(h), None) => h.to_owned(),
        _ => String::new(),
    };
    let canonical_request = format!(
        "{}\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
        method,
        url.path(),
        query,
        host
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac_sha256(format!("AWS4{}", creds.secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    url.set_query(Some(&format!("{}&X-Amz-Signature={}", query, signature)));
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match Hmac::<Sha256>::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => unreachable!("hmac keys have no length limit"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Everything but the SigV4 unreserved characters.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

const UNRESERVED_OR_SLASH: &AsciiSet = &UNRESERVED.remove(b'/');

fn uri_encode_path(path: &str) -> String {
    utf8_percent_encode(path, UNRESERVED_OR_SLASH).to_string()
}

fn uri_encode_value(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}
