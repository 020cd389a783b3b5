//! In-memory block store.

use ahash::AHashMap;

use super::{BlockFetcher, BlockId, BlockStore};
use crate::error::FetchError;
use crate::Result;

/// Block store backed by a hash map.
///
/// Useful for tests and for generating a dataset before exporting it.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blocks: AHashMap<BlockId, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn get(&self, id: &BlockId) -> Option<&[u8]> {
        self.blocks.get(id).map(Vec::as_slice)
    }

    /// Ids of all stored blocks, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &BlockId> {
        self.blocks.keys()
    }

    /// Overwrite the bytes stored under `id` without checking the hash.
    ///
    /// Only meant for simulating corrupted sources.
    pub fn insert_unchecked(&mut self, id: BlockId, bytes: Vec<u8>) {
        self.blocks.insert(id, bytes);
    }
}

impl BlockStore for MemoryStore {
    fn put(&mut self, id: &BlockId, bytes: &[u8]) -> Result<()> {
        self.blocks.entry(*id).or_insert_with(|| bytes.to_vec());
        Ok(())
    }
}

impl BlockFetcher for MemoryStore {
    fn fetch(&self, id: &BlockId) -> std::result::Result<Vec<u8>, FetchError> {
        self.blocks
            .get(id)
            .cloned()
            .ok_or(FetchError::NotFound(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_fetch() {
        let mut store = MemoryStore::new();
        let id = store.put_block(b"abc").unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains(&id));
        assert_eq!(store.fetch(&id).unwrap(), b"abc");
        assert_eq!(store.get(&id), Some(&b"abc"[..]));
    }

    #[test]
    fn test_put_is_idempotent() {
        let mut store = MemoryStore::new();
        let first = store.put_block(b"same").unwrap();
        let second = store.put_block(b"same").unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_block() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert!(matches!(
            store.fetch(&BlockId::of(b"nope")),
            Err(FetchError::NotFound(_))
        ));
    }
}
