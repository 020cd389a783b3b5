//! Deterministic block encoding.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::block::MAX_BLOCK_SIZE;
use crate::error::CodecError;

/// Encodes values into block bytes and back.
///
/// Encoding must be deterministic: equal values produce equal bytes, so equal
/// structures share one block id. Decoding must reject bytes that are not a
/// complete encoding of the requested type.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Default codec: bincode with varint integers and no trailing bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }

    fn options() -> impl Options {
        bincode::DefaultOptions::new()
            .with_limit(MAX_BLOCK_SIZE as u64)
            .reject_trailing_bytes()
    }
}

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Self::options()
            .serialize(value)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Self::options()
            .deserialize(bytes)
            .map_err(|e| CodecError::Decode(e.to_string()))
    }
}

impl<C: Codec + ?Sized> Codec for &C {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        (**self).encode(value)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        (**self).decode(bytes)
    }
}
