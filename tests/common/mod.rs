#![allow(dead_code)]

use rand::Rng;
use slicestore::config::HttpConfig;
use slicestore::retry::RetryPolicy;
use std::time::Duration;
use tokio::runtime::Runtime;
use wiremock::MockServer;

/// A mock server for blocking clients. The server runs on its own thread, so
/// the runtime is only needed to start it and to mount mocks.
pub struct Server {
    pub rt: Runtime,
    pub mock: MockServer,
}

impl Server {
    pub fn start() -> Self {
        let rt = Runtime::new().expect("tokio runtime");
        let mock = rt.block_on(MockServer::start());
        Self { rt, mock }
    }

    pub fn mount(&self, m: wiremock::Mock) {
        self.rt.block_on(m.mount(&self.mock));
    }

    pub fn reset(&self) {
        self.rt.block_on(self.mock.reset());
    }

    pub fn request_count(&self) -> usize {
        self.rt
            .block_on(self.mock.received_requests())
            .map(|r| r.len())
            .unwrap_or_default()
    }

    pub fn url(&self, path: &str) -> url::Url {
        url::Url::parse(&format!("{}{}", self.mock.uri(), path)).expect("mock url")
    }
}

/// Retries quickly so failure tests stay fast.
pub fn fast_http(max_attempts: u32) -> HttpConfig {
    HttpConfig {
        retry: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..HttpConfig::default()
    }
}

/// A random 100x100 single-byte tile.
pub fn random_tile() -> Vec<u8> {
    let mut buf = vec![0u8; 100 * 100];
    rand::thread_rng().fill(&mut buf[..]);
    buf
}

/// `data` with one byte flipped.
pub fn corrupted(data: &[u8]) -> Vec<u8> {
    let mut bad = data.to_vec();
    bad[data.len() / 2] ^= 0xff;
    bad
}
