//! HTTP gateway block fetcher.

use std::io::Read;
use std::time::Duration;

use super::{BlockFetcher, BlockId, MAX_BLOCK_SIZE};
use crate::error::FetchError;

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches blocks over HTTP as `GET {base}/{id}`.
///
/// A [`super::DirStore`] directory served by a static file server is a valid
/// gateway.
pub struct GatewayFetcher {
    base: String,
    agent: ureq::Agent,
    max_block_size: usize,
}

impl GatewayFetcher {
    /// Create a fetcher for a gateway base URL.
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_timeout(base, DEFAULT_TIMEOUT)
    }

    /// Create a fetcher with a custom request timeout.
    pub fn with_timeout(base: impl Into<String>, timeout: Duration) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self {
            base,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            max_block_size: MAX_BLOCK_SIZE,
        }
    }

    /// URL a block is requested from.
    pub fn block_url(&self, id: &BlockId) -> String {
        format!("{}/{}", self.base, id)
    }
}

impl BlockFetcher for GatewayFetcher {
    fn fetch(&self, id: &BlockId) -> Result<Vec<u8>, FetchError> {
        let url = self.block_url(id);
        let response = self
            .agent
            .get(&url)
            .set("Accept", "application/octet-stream")
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(404, _) => FetchError::NotFound(*id),
                ureq::Error::Status(code, _) => FetchError::Status(code),
                ureq::Error::Transport(t) => FetchError::Transport(t.to_string()),
            })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.max_block_size as u64 + 1)
            .read_to_end(&mut bytes)?;

        if bytes.len() > self.max_block_size {
            return Err(FetchError::TooLarge(bytes.len()));
        }

        log::trace!("Fetched block {} from {} ({} bytes)", id, self.base, bytes.len());
        Ok(bytes)
    }
}
