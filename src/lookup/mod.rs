//! Lookup engine.
//!
//! Resolves an address against a published dataset by walking the index tree
//! over a [`BlockFetcher`], then reading the matching location table page.
//!
//! # Caching
//!
//! - Index nodes and location pages: bounded LRU caches keyed by block id
//! - Root metadata and page lists: small unbounded maps, one entry per dataset
//! - Query results: bounded LRU cache keyed by `(root, address)`
//!
//! Blocks are immutable, so cached entries never go stale. Two threads missing
//! the same key at once both fetch it; the second insert overwrites the first
//! with an equal value. Failed lookups are never cached.
//!
//! # Example
//!
//! ```ignore
//! use geoblock::{FallbackFetcher, LookupEngine};
//!
//! let fetcher = FallbackFetcher::from_gateways(["https://gateway.example/blocks"]);
//! let engine = LookupEngine::new(fetcher);
//! let location = engine.lookup(&root, "194.158.92.200")?;
//! println!("{}", location.formatted());
//! ```

mod fetch;
mod pretty;

pub use fetch::BlockLoader;
pub use pretty::parse_candidate;

use ahash::AHashMap;
use parking_lot::RwLock;
use quick_cache::sync::Cache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::block::{BlockFetcher, BlockId};
use crate::codec::{BincodeCodec, Codec};
use crate::key::{ip_to_key, Key};
use crate::location::{page_position, Location, LocationPage, LocationRecord, PageList};
use crate::tree::{floor_search, Node, RootMetadata, UNMAPPED_LOCATION};
use crate::{Error, Result};

/// Default capacity of the index node cache.
const DEFAULT_NODE_CACHE_CAPACITY: usize = 4096;

/// Default capacity of the location page cache.
const DEFAULT_PAGE_CACHE_CAPACITY: usize = 256;

/// Default capacity of the query result cache.
const DEFAULT_QUERY_CACHE_CAPACITY: usize = 10_000;

/// Default number of attempts per block.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Configuration for the lookup engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Maximum number of decoded index nodes kept; 0 disables the cache
    pub node_cache_capacity: usize,
    /// Maximum number of decoded location pages kept; 0 disables the cache
    pub page_cache_capacity: usize,
    /// Maximum number of query results kept; 0 disables the cache
    pub query_cache_capacity: usize,
    /// Attempts per block before a fetch or decode failure is surfaced
    pub max_attempts: u32,
    /// Check that fetched bytes hash to the requested id
    pub verify_blocks: bool,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            node_cache_capacity: DEFAULT_NODE_CACHE_CAPACITY,
            page_cache_capacity: DEFAULT_PAGE_CACHE_CAPACITY,
            query_cache_capacity: DEFAULT_QUERY_CACHE_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            verify_blocks: true,
        }
    }
}

impl LookupConfig {
    /// Create a configuration with every bounded cache set to `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            node_cache_capacity: capacity,
            page_cache_capacity: capacity,
            query_cache_capacity: capacity,
            ..Default::default()
        }
    }

    /// Create a configuration with the bounded caches disabled.
    pub fn no_cache() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_verify_blocks(mut self, verify: bool) -> Self {
        self.verify_blocks = verify;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Usage of one bounded cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Maximum cache capacity.
    pub capacity: usize,
    /// Current number of entries in the cache.
    pub len: usize,
    /// Whether caching is enabled.
    pub enabled: bool,
}

impl CacheStats {
    fn of<K, V>(cache: &Option<Cache<K, V>>, capacity: usize) -> Self
    where
        K: Eq + std::hash::Hash,
        V: Clone,
    {
        match cache {
            Some(cache) => Self {
                capacity,
                len: cache.len(),
                enabled: true,
            },
            None => Self {
                capacity: 0,
                len: 0,
                enabled: false,
            },
        }
    }
}

/// Usage of all engine caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCacheStats {
    pub nodes: CacheStats,
    pub pages: CacheStats,
    pub queries: CacheStats,
    /// Cached root metadata entries
    pub roots: usize,
    /// Cached location table page lists
    pub page_lists: usize,
    /// Lookups answered from the query cache
    pub query_hits: u64,
}

fn bounded<K, V>(capacity: usize) -> Option<Cache<K, V>>
where
    K: Eq + std::hash::Hash,
    V: Clone,
{
    if capacity > 0 {
        Some(Cache::new(capacity))
    } else {
        None
    }
}

/// Resolves addresses to locations against published datasets.
///
/// One engine can serve any number of datasets; every cache is keyed by
/// block id. The engine is `Sync` and meant to be shared between threads.
pub struct LookupEngine<F: BlockFetcher, C: Codec = BincodeCodec> {
    loader: BlockLoader<F, C>,
    config: LookupConfig,
    roots: RwLock<AHashMap<BlockId, Arc<RootMetadata>>>,
    page_lists: RwLock<AHashMap<BlockId, Arc<PageList>>>,
    nodes: Option<Cache<BlockId, Arc<Node>>>,
    pages: Option<Cache<BlockId, Arc<LocationPage>>>,
    queries: Option<Cache<(BlockId, String), Location>>,
    query_hits: AtomicU64,
}

impl<F: BlockFetcher> LookupEngine<F, BincodeCodec> {
    /// Create an engine with the default configuration.
    pub fn new(fetcher: F) -> Self {
        Self::build(fetcher, BincodeCodec::new(), LookupConfig::default())
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(fetcher: F, config: LookupConfig) -> Result<Self> {
        Self::with_codec(fetcher, BincodeCodec::new(), config)
    }
}

impl<F: BlockFetcher, C: Codec> LookupEngine<F, C> {
    /// Create an engine with a custom codec and configuration.
    pub fn with_codec(fetcher: F, codec: C, config: LookupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(fetcher, codec, config))
    }

    fn build(fetcher: F, codec: C, config: LookupConfig) -> Self {
        Self {
            loader: BlockLoader::new(fetcher, codec, config.max_attempts, config.verify_blocks),
            nodes: bounded(config.node_cache_capacity),
            pages: bounded(config.page_cache_capacity),
            queries: bounded(config.query_cache_capacity),
            roots: RwLock::new(AHashMap::new()),
            page_lists: RwLock::new(AHashMap::new()),
            query_hits: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &F {
        self.loader.fetcher()
    }

    /// Number of block fetches issued so far, retries included.
    pub fn fetch_count(&self) -> u64 {
        self.loader.fetch_count()
    }

    /// Resolve `ip` against the dataset published as `root`.
    ///
    /// The address is parsed before anything is fetched. Fails with
    /// [`Error::UnmappedRange`] when no range covers the address or the
    /// covering range is explicitly unmapped.
    pub fn lookup(&self, root: &BlockId, ip: &str) -> Result<Location> {
        let ip = ip.trim();
        let key = ip_to_key(ip)?;

        let cache_key = (*root, ip.to_string());
        if let Some(ref cache) = self.queries {
            if let Some(location) = cache.get(&cache_key) {
                self.query_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(location);
            }
        }

        let location = self.lookup_key(root, &key)?;

        if let Some(ref cache) = self.queries {
            cache.insert(cache_key, location.clone());
        }
        Ok(location)
    }

    /// Resolve an already normalized key. Results are not memoized.
    pub fn lookup_key(&self, root: &BlockId, key: &Key) -> Result<Location> {
        let metadata = self.metadata(root)?;
        let location_id = self
            .location_id(&metadata, key)?
            .ok_or(Error::UnmappedRange)?;
        let record = self.location_record(&metadata, location_id)?;
        Ok(Location::from(record))
    }

    /// Location id of the range covering `key`, `None` when no range does.
    ///
    /// The unmapped sentinel is reported as `None` too.
    pub fn location_id(&self, metadata: &RootMetadata, key: &Key) -> Result<Option<u32>> {
        let found = floor_search(&metadata.index_root, key, |id| self.node(id))?;
        Ok(found.filter(|id| *id != UNMAPPED_LOCATION))
    }

    /// Root metadata of a dataset, fetched once and kept for the engine's
    /// lifetime.
    pub fn metadata(&self, root: &BlockId) -> Result<Arc<RootMetadata>> {
        if let Some(metadata) = self.roots.read().get(root) {
            return Ok(metadata.clone());
        }

        let metadata: RootMetadata = self.loader.load(root)?;
        metadata.validate()?;
        log::debug!(
            "Loaded dataset {} ({} entries, {} locations)",
            root,
            metadata.entry_count,
            metadata.location_count
        );

        let metadata = Arc::new(metadata);
        self.roots.write().insert(*root, metadata.clone());
        Ok(metadata)
    }

    /// Record stored under `location_id`.
    pub fn location_record(
        &self,
        metadata: &RootMetadata,
        location_id: u32,
    ) -> Result<LocationRecord> {
        if location_id == UNMAPPED_LOCATION {
            return Err(Error::UnmappedRange);
        }
        if u64::from(location_id) > metadata.location_count {
            return Err(Error::StructuralCorruption(format!(
                "location id {} exceeds location count {}",
                location_id, metadata.location_count
            )));
        }

        let (page_index, offset) = page_position(location_id, metadata.page_size);
        let list = self.page_list(&metadata.location_table_root)?;
        let page_id = list.pages.get(page_index).ok_or_else(|| {
            Error::StructuralCorruption(format!(
                "location table has no page {} for location {}",
                page_index, location_id
            ))
        })?;
        let page = self.page(page_id)?;

        page.get(offset).cloned().ok_or_else(|| {
            Error::StructuralCorruption(format!(
                "location {} missing from page {}",
                location_id, page_id
            ))
        })
    }

    fn node(&self, id: &BlockId) -> Result<Arc<Node>> {
        if let Some(ref cache) = self.nodes {
            if let Some(node) = cache.get(id) {
                return Ok(node);
            }
        }

        let node: Arc<Node> = Arc::new(self.loader.load(id)?);
        if let Some(ref cache) = self.nodes {
            cache.insert(*id, node.clone());
        }
        Ok(node)
    }

    fn page(&self, id: &BlockId) -> Result<Arc<LocationPage>> {
        if let Some(ref cache) = self.pages {
            if let Some(page) = cache.get(id) {
                return Ok(page);
            }
        }

        let page: Arc<LocationPage> = Arc::new(self.loader.load(id)?);
        if let Some(ref cache) = self.pages {
            cache.insert(*id, page.clone());
        }
        Ok(page)
    }

    fn page_list(&self, id: &BlockId) -> Result<Arc<PageList>> {
        if let Some(list) = self.page_lists.read().get(id) {
            return Ok(list.clone());
        }

        let list: Arc<PageList> = Arc::new(self.loader.load(id)?);
        self.page_lists.write().insert(*id, list.clone());
        Ok(list)
    }

    /// Drop every cached block and query result.
    pub fn clear_cache(&self) {
        if let Some(ref cache) = self.nodes {
            cache.clear();
        }
        if let Some(ref cache) = self.pages {
            cache.clear();
        }
        if let Some(ref cache) = self.queries {
            cache.clear();
        }
        self.roots.write().clear();
        self.page_lists.write().clear();
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> EngineCacheStats {
        EngineCacheStats {
            nodes: CacheStats::of(&self.nodes, self.config.node_cache_capacity),
            pages: CacheStats::of(&self.pages, self.config.page_cache_capacity),
            queries: CacheStats::of(&self.queries, self.config.query_cache_capacity),
            roots: self.roots.read().len(),
            page_lists: self.page_lists.read().len(),
            query_hits: self.query_hits.load(Ordering::Relaxed),
        }
    }
}
