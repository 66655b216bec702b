//! Read-only access to objects under a base URL.
//!
//! Responses are buffered in full when a checksum is known, since the body
//! can't be rewound after hashing it. Without a checksum the live body is
//! handed straight to the caller and nothing is held in memory.

use super::Backend;
use crate::config::HttpConfig;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::reference;
use crate::retry::{check_status, RetryPolicy};
use crate::stream::{ReadStream, WriteStream};
use reqwest::blocking::{Client, Response};
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base: Url,
    client: Client,
    retry: RetryPolicy,
}

impl HttpBackend {
    pub fn new(base: Url) -> Result<Self> {
        Self::with_config(base, &HttpConfig::default())
    }

    pub fn with_config(base: Url, cfg: &HttpConfig) -> Result<Self> {
        Ok(Self::with_client(base, cfg.client()?, cfg.retry))
    }

    /// Share an existing client (and its connection pool) with other backends.
    pub fn with_client(base: Url, client: Client, retry: RetryPolicy) -> Self {
        Self {
            base,
            client,
            retry,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn get(&self, url: &Url) -> Result<Response> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| Error::transport_cause(url.as_str(), e))?;
        check_status(url.as_str(), resp.status())?;
        Ok(resp)
    }

    fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let resp = self.get(url)?;
        let body = resp
            .bytes()
            .map_err(|e| Error::transport_cause(url.as_str(), e))?;
        Ok(body.to_vec())
    }
}

impl Backend for HttpBackend {
    fn open_for_read(&self, name: &str, checksum: Option<&Digest>) -> Result<ReadStream> {
        let url = reference::join(&self.base, name);
        tracing::debug!(%url, verified = checksum.is_some(), "http read");
        match checksum {
            None => {
                let resp = self.retry.run("GET", || self.get(&url))?;
                Ok(ReadStream::from_response(resp))
            }
            Some(_) => {
                // A body cut off mid-transfer is retried along with the request.
                let bytes = self.retry.run("GET", || self.get_bytes(&url))?;
                ReadStream::verified(bytes, checksum)
            }
        }
    }

    fn open_for_write(&self, _name: &str) -> Result<WriteStream> {
        Err(Error::Unsupported {
            operation: "write",
            backend: "http",
        })
    }

    fn describe(&self) -> String {
        self.base.to_string()
    }
}
