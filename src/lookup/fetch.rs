//! Block loading with verification and retries.

use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::block::{BlockFetcher, BlockId};
use crate::codec::Codec;
use crate::error::{CodecError, FetchError};
use crate::{Error, Result};

/// Failure of one load attempt.
enum AttemptError {
    Fetch(FetchError),
    Decode(CodecError),
}

/// Fetches, verifies and decodes blocks, retrying failed attempts.
///
/// Every attempt fetches the block again, so a source that returned bad bytes
/// once gets another chance. Retries are immediate. When the budget runs out
/// the error kind of the last attempt is surfaced.
pub struct BlockLoader<F, C> {
    fetcher: F,
    codec: C,
    max_attempts: u32,
    verify_blocks: bool,
    fetches: AtomicU64,
}

impl<F: BlockFetcher, C: Codec> BlockLoader<F, C> {
    pub fn new(fetcher: F, codec: C, max_attempts: u32, verify_blocks: bool) -> Self {
        Self {
            fetcher,
            codec,
            max_attempts: max_attempts.max(1),
            verify_blocks,
            fetches: AtomicU64::new(0),
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Number of fetch calls made so far, failed ones included.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Load and decode the block `id`.
    pub fn load<T: DeserializeOwned>(&self, id: &BlockId) -> Result<T> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match self.attempt(id) {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!("Block {} loaded on attempt {}", id, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    match &e {
                        AttemptError::Fetch(err) => {
                            log::debug!("Fetch attempt {} for {} failed: {}", attempt, id, err)
                        }
                        AttemptError::Decode(err) => {
                            log::debug!("Decode attempt {} for {} failed: {}", attempt, id, err)
                        }
                    }
                    last_error = Some(e);
                }
            }
        }

        let attempts = self.max_attempts;
        Err(match last_error {
            Some(AttemptError::Decode(source)) => Error::DecodeExhausted {
                id: *id,
                attempts,
                source,
            },
            Some(AttemptError::Fetch(source)) => Error::FetchExhausted {
                id: *id,
                attempts,
                source,
            },
            None => Error::FetchExhausted {
                id: *id,
                attempts,
                source: FetchError::NoSources,
            },
        })
    }

    fn attempt<T: DeserializeOwned>(&self, id: &BlockId) -> std::result::Result<T, AttemptError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let bytes = self.fetcher.fetch(id).map_err(AttemptError::Fetch)?;

        if self.verify_blocks {
            let actual = BlockId::of(&bytes);
            if actual != *id {
                return Err(AttemptError::Fetch(FetchError::HashMismatch {
                    expected: *id,
                    actual,
                }));
            }
        }

        self.codec.decode(&bytes).map_err(AttemptError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockStore, MemoryStore};
    use crate::codec::BincodeCodec;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` fetches, then serves from a store.
    struct Flaky {
        store: MemoryStore,
        failures: AtomicU32,
    }

    impl BlockFetcher for Flaky {
        fn fetch(&self, id: &BlockId) -> std::result::Result<Vec<u8>, FetchError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(FetchError::Transport("connection reset".to_string()));
            }
            self.store.fetch(id)
        }
    }

    fn store_with(value: &(u32, String)) -> (MemoryStore, BlockId) {
        let mut store = MemoryStore::new();
        let bytes = BincodeCodec::new().encode(value).unwrap();
        let id = store.put_block(&bytes).unwrap();
        (store, id)
    }

    #[test]
    fn test_load_first_try() {
        let value = (7, "seven".to_string());
        let (store, id) = store_with(&value);
        let loader = BlockLoader::new(store, BincodeCodec::new(), 3, true);

        assert_eq!(loader.load::<(u32, String)>(&id).unwrap(), value);
        assert_eq!(loader.fetch_count(), 1);
    }

    #[test]
    fn test_transient_fetch_failure_is_retried() {
        let value = (1, "one".to_string());
        let (store, id) = store_with(&value);
        let flaky = Flaky {
            store,
            failures: AtomicU32::new(2),
        };
        let loader = BlockLoader::new(flaky, BincodeCodec::new(), 3, true);

        assert_eq!(loader.load::<(u32, String)>(&id).unwrap(), value);
        assert_eq!(loader.fetch_count(), 3);
    }

    #[test]
    fn test_fetch_exhausted() {
        let (store, id) = store_with(&(1, "one".to_string()));
        let flaky = Flaky {
            store,
            failures: AtomicU32::new(3),
        };
        let loader = BlockLoader::new(flaky, BincodeCodec::new(), 3, true);

        match loader.load::<(u32, String)>(&id) {
            Err(Error::FetchExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected FetchExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_exhausted() {
        let mut store = MemoryStore::new();
        let id = store.put_block(b"not an encoded tuple").unwrap();
        let loader = BlockLoader::new(store, BincodeCodec::new(), 3, true);

        match loader.load::<(u32, String)>(&id) {
            Err(Error::DecodeExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected DecodeExhausted, got {:?}", other),
        }
        assert_eq!(loader.fetch_count(), 3);
    }

    #[test]
    fn test_hash_mismatch_counts_as_fetch_failure() {
        let (mut store, id) = store_with(&(1, "one".to_string()));
        let forged = BincodeCodec::new().encode(&(2u32, "two".to_string())).unwrap();
        store.insert_unchecked(id, forged);

        let loader = BlockLoader::new(store.clone(), BincodeCodec::new(), 2, true);
        match loader.load::<(u32, String)>(&id) {
            Err(Error::FetchExhausted {
                source: FetchError::HashMismatch { .. },
                ..
            }) => {}
            other => panic!("expected hash mismatch, got {:?}", other),
        }

        // Without verification the forged bytes are accepted
        let trusting = BlockLoader::new(store, BincodeCodec::new(), 2, false);
        assert_eq!(
            trusting.load::<(u32, String)>(&id).unwrap(),
            (2, "two".to_string())
        );
    }
}
