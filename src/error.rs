//! Error types for geoblock.

use thiserror::Error;

use crate::block::BlockId;

/// Error type for geoblock operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Input could not be parsed as an IPv4 or IPv6 address
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Input could not be parsed as a CIDR network
    #[error("invalid CIDR network: {0}")]
    InvalidCidr(String),

    /// Text is not a valid block identifier
    #[error("invalid block id: {0}")]
    InvalidBlockId(String),

    /// Block retrieval kept failing until the retry budget ran out
    #[error("fetching block {id} failed after {attempts} attempts: {source}")]
    FetchExhausted {
        id: BlockId,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    /// Block bytes kept failing to decode until the retry budget ran out
    #[error("decoding block {id} failed after {attempts} attempts: {source}")]
    DecodeExhausted {
        id: BlockId,
        attempts: u32,
        #[source]
        source: CodecError,
    },

    /// No range in the dataset covers the address
    #[error("Unmapped range")]
    UnmappedRange,

    /// The index violates a structural invariant
    #[error("structural corruption: {0}")]
    StructuralCorruption(String),

    /// Unsupported dataset format version
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// Encoding failed while writing blocks
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed source data with no safe default
    #[error("malformed source data: {0}")]
    Source(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::FetchExhausted { .. } | Error::DecodeExhausted { .. }
        )
    }

    /// Whether the lookup completed without finding data for the address.
    pub fn is_unmapped(&self) -> bool {
        matches!(self, Error::UnmappedRange)
    }
}

/// Result type alias for geoblock operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for a single block fetch attempt.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The source does not hold the block
    #[error("block not found: {0}")]
    NotFound(BlockId),

    /// Fetched bytes do not hash to the requested id
    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: BlockId, actual: BlockId },

    /// Gateway answered with a non-success status
    #[error("HTTP status {0}")]
    Status(u16),

    /// Gateway could not be reached
    #[error("transport error: {0}")]
    Transport(String),

    /// Block exceeds the accepted size
    #[error("block too large: {0} bytes")]
    TooLarge(usize),

    /// No fetch source is configured
    #[error("no block sources configured")]
    NoSources,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for block encoding and decoding.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Value could not be encoded
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes are not a valid encoding of the expected value
    #[error("decode failed: {0}")]
    Decode(String),
}
