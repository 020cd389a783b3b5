//! Geoblock - IP geolocation over a content-addressed range index.
//!
//! A dataset is an immutable tree of blocks, each addressed by the SHA-256
//! digest of its bytes. The generator builds it once from CSV sources; the
//! lookup engine walks it lazily over any block source, fetching only the
//! nodes on one root-to-leaf path per query.
//!
//! # Features
//!
//! - **One key space**: IPv4 and IPv6 addresses share a 128-bit sortable key
//! - **Content addressing**: unchanged subtrees keep their ids across dataset
//!   versions, thanks to content-defined node boundaries
//! - **Pluggable sources**: in-memory, directory, HTTP gateways, fallback lists
//! - **Caching**: bounded LRU caches for nodes, pages and query results
//! - **Retries**: failed fetches and undecodable blocks are retried, then
//!   surfaced with a distinguishable error kind
//! - **Thread-safe**: one engine serves concurrent lookups
//!
//! # Quick Start
//!
//! ```ignore
//! use geoblock::{Generator, GeneratorConfig, LookupEngine, MemoryStore};
//!
//! let mut store = MemoryStore::new();
//! let generator = Generator::new(GeneratorConfig::default())?;
//! let dataset = generator.generate(locations_csv, [blocks_csv], &mut store)?;
//!
//! let engine = LookupEngine::new(store);
//! let location = engine.lookup(&dataset.root, "194.158.92.200")?;
//! assert_eq!(location.country_code, "AD");
//!
//! let pretty = engine.lookup_pretty(&dataset.root, ["/ip4/127.0.0.1", "/ip4/194.158.92.200"])?;
//! println!("{}", pretty.formatted);
//! ```
//!
//! # Errors
//!
//! Lookups fail with one of:
//! - [`Error::InvalidAddress`]: the input is not an address, nothing was fetched
//! - [`Error::UnmappedRange`]: no data for the address, a normal outcome
//! - [`Error::FetchExhausted`] / [`Error::DecodeExhausted`]: transient, try
//!   again later
//! - [`Error::StructuralCorruption`]: the dataset is broken

mod error;

pub mod block;
pub mod codec;
pub mod generate;
pub mod handle;
pub mod key;
pub mod location;
pub mod lookup;
pub mod tree;

// Re-export core types
pub use error::{CodecError, Error, FetchError, Result};
pub use key::Key;

// Re-export block sources
pub use block::{
    BlockFetcher, BlockId, BlockStore, DirStore, FallbackFetcher, GatewayFetcher, MemoryStore,
};
pub use codec::{BincodeCodec, Codec};

// Re-export generation and lookup
pub use generate::{GeneratedDataset, GenerationStats, Generator, GeneratorConfig};
pub use handle::DatasetHandle;
pub use location::{Location, LocationRecord, PrettyLocation};
pub use lookup::{CacheStats, EngineCacheStats, LookupConfig, LookupEngine};
pub use tree::{RootMetadata, FORMAT_VERSION};
