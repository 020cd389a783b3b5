//! Content-addressed block layer.
//!
//! Every structure in a dataset is stored as an immutable block addressed by
//! the SHA-256 digest of its bytes. Writers go through [`BlockStore`], readers
//! through [`BlockFetcher`].
//!
//! # Sources
//!
//! - [`MemoryStore`]: in-process map, both readable and writable
//! - [`DirStore`]: one file per block in a directory
//! - [`GatewayFetcher`]: HTTP `GET {base}/{id}`
//! - [`FallbackFetcher`]: ordered list of sources, first success wins

mod dir;
mod gateway;
mod memory;

pub use dir::DirStore;
pub use gateway::GatewayFetcher;
pub use memory::MemoryStore;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::FetchError;
use crate::{Error, Result};

/// Maximum accepted block size (4 MiB).
pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Length of a block id digest in bytes.
pub const BLOCK_ID_LEN: usize = 32;

/// Identifier of an immutable block: SHA-256 of its bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId([u8; BLOCK_ID_LEN]);

impl BlockId {
    /// Compute the id of a block.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut id = [0u8; BLOCK_ID_LEN];
        id.copy_from_slice(&digest);
        BlockId(id)
    }

    pub fn from_bytes(bytes: [u8; BLOCK_ID_LEN]) -> Self {
        BlockId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_ID_LEN] {
        &self.0
    }

    /// First eight digest bytes as an integer, used as a chunking hash.
    pub fn prefix_u64(&self) -> u64 {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(prefix)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self)
    }
}

impl FromStr for BlockId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let mut id = [0u8; BLOCK_ID_LEN];
        hex::decode_to_slice(s, &mut id).map_err(|_| Error::InvalidBlockId(s.to_string()))?;
        Ok(BlockId(id))
    }
}

// Hex string in JSON, raw digest bytes in the binary codec.
impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; BLOCK_ID_LEN]>::deserialize(deserializer).map(BlockId)
        }
    }
}

/// Read side of a block source.
///
/// Implementations may fail transiently; callers own the retry policy.
pub trait BlockFetcher: Send + Sync {
    /// Fetch the raw bytes of a block.
    fn fetch(&self, id: &BlockId) -> std::result::Result<Vec<u8>, FetchError>;
}

impl<T: BlockFetcher + ?Sized> BlockFetcher for &T {
    fn fetch(&self, id: &BlockId) -> std::result::Result<Vec<u8>, FetchError> {
        (**self).fetch(id)
    }
}

impl<T: BlockFetcher + ?Sized> BlockFetcher for Arc<T> {
    fn fetch(&self, id: &BlockId) -> std::result::Result<Vec<u8>, FetchError> {
        (**self).fetch(id)
    }
}

impl<T: BlockFetcher + ?Sized> BlockFetcher for Box<T> {
    fn fetch(&self, id: &BlockId) -> std::result::Result<Vec<u8>, FetchError> {
        (**self).fetch(id)
    }
}

/// Write side of a block source.
///
/// Blocks are write-once: putting an id that already exists is a no-op.
/// The `&mut` receiver makes concurrent writers serialize access.
pub trait BlockStore: Send {
    /// Store `bytes` under `id`. `id` must be `BlockId::of(bytes)`.
    fn put(&mut self, id: &BlockId, bytes: &[u8]) -> Result<()>;

    /// Store `bytes` and return their id.
    fn put_block(&mut self, bytes: &[u8]) -> Result<BlockId> {
        let id = BlockId::of(bytes);
        self.put(&id, bytes)?;
        Ok(id)
    }
}

impl<S: BlockStore + ?Sized> BlockStore for &mut S {
    fn put(&mut self, id: &BlockId, bytes: &[u8]) -> Result<()> {
        (**self).put(id, bytes)
    }
}

/// Ordered list of block sources tried in turn for each fetch.
///
/// The first source that returns the block wins; if every source fails the
/// last error is returned.
pub struct FallbackFetcher {
    sources: Vec<Box<dyn BlockFetcher>>,
}

impl FallbackFetcher {
    pub fn new(sources: Vec<Box<dyn BlockFetcher>>) -> Self {
        Self { sources }
    }

    /// Append a source tried after all existing ones.
    pub fn with_source(mut self, source: impl BlockFetcher + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Build a fetcher over a list of HTTP gateways.
    pub fn from_gateways<I, S>(gateways: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sources = gateways
            .into_iter()
            .map(|base| Box::new(GatewayFetcher::new(base)) as Box<dyn BlockFetcher>)
            .collect();
        Self::new(sources)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl BlockFetcher for FallbackFetcher {
    fn fetch(&self, id: &BlockId) -> std::result::Result<Vec<u8>, FetchError> {
        let mut last_error = FetchError::NoSources;
        for (index, source) in self.sources.iter().enumerate() {
            match source.fetch(id) {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    log::debug!("Source {} failed for block {}: {}", index, id, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}
