//! Range index tree.
//!
//! The index is an immutable tree of content-addressed nodes. Leaves hold
//! `(start key, value)` entries sorted by start key, where the value names a
//! location and the last key of the range. Branches hold, for each child, the
//! smallest key reachable through it. The leftmost branch entry of every
//! level starts at [`Key::ZERO`], so every key has a covering branch path.
//!
//! # Lookup
//!
//! Lookups are floor searches: at each node pick the rightmost entry whose
//! key does not exceed the search key, descend, and finally check that the
//! leaf entry's range reaches the search key.

pub mod builder;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::block::BlockId;
use crate::key::Key;
use crate::{Error, Result};

pub use builder::TreeBuilder;

/// Dataset format version written into [`RootMetadata`].
pub const FORMAT_VERSION: u32 = 1;

/// Location id reserved for ranges known to have no location.
pub const UNMAPPED_LOCATION: u32 = 0;

/// Upper bound on tree height accepted during traversal.
const MAX_DEPTH: usize = 64;

/// Last key of an entry's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeEnd {
    /// Absolute last key
    Full(Key),
    /// Distance from the entry's start key to its last key
    Span(u128),
}

/// Payload of a leaf entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexValue {
    pub location_id: u32,
    pub end: RangeEnd,
}

impl IndexValue {
    /// Value storing the absolute end key.
    pub fn full(location_id: u32, end: Key) -> Self {
        Self {
            location_id,
            end: RangeEnd::Full(end),
        }
    }

    /// Value storing the end as a distance from `start`.
    pub fn compact(location_id: u32, start: Key, end: Key) -> Result<Self> {
        let span = start.span_to(end).ok_or_else(|| {
            Error::StructuralCorruption(format!("range end {} before start {}", end, start))
        })?;
        Ok(Self {
            location_id,
            end: RangeEnd::Span(span),
        })
    }

    /// Resolve the last key of the range starting at `start`.
    pub fn end_key(&self, start: Key) -> Result<Key> {
        match self.end {
            RangeEnd::Full(end) => Ok(end),
            RangeEnd::Span(span) => start.checked_add(span).ok_or_else(|| {
                Error::StructuralCorruption(format!("range span overflows from {}", start))
            }),
        }
    }

    pub fn is_unmapped(&self) -> bool {
        self.location_id == UNMAPPED_LOCATION
    }
}

/// Entry of a leaf node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEntry {
    pub key: Key,
    pub value: IndexValue,
}

impl LeafEntry {
    pub fn new(key: Key, value: IndexValue) -> Self {
        Self { key, value }
    }

    pub fn end_key(&self) -> Result<Key> {
        self.value.end_key(self.key)
    }
}

/// Entry of a branch node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchEntry {
    /// Smallest key reachable through `child`
    pub min_key: Key,
    pub child: BlockId,
}

/// Interior node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Height above the leaves (1 = children are leaves)
    pub level: u32,
    pub children: Vec<BranchEntry>,
}

impl Branch {
    /// Rightmost child whose minimum key does not exceed `key`.
    pub fn floor_child(&self, key: &Key) -> Option<&BranchEntry> {
        self.children.iter().rev().find(|entry| entry.min_key <= *key)
    }
}

/// Terminal node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    pub entries: Vec<LeafEntry>,
}

impl Leaf {
    /// Rightmost entry whose start key does not exceed `key`.
    pub fn floor_entry(&self, key: &Key) -> Option<&LeafEntry> {
        self.entries.iter().rev().find(|entry| entry.key <= *key)
    }
}

/// Index tree node; the variant is selected by the encoded discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Branch(Branch),
    Leaf(Leaf),
}

/// Published entry point of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootMetadata {
    pub version: u32,
    pub index_root: BlockId,
    pub location_table_root: BlockId,
    pub entry_count: u64,
    pub location_count: u64,
    pub page_size: u32,
}

impl RootMetadata {
    /// Validate version and invariants readers rely on.
    pub fn validate(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }
        if self.page_size == 0 {
            return Err(Error::StructuralCorruption(
                "root metadata has zero page size".to_string(),
            ));
        }
        Ok(())
    }
}

/// Find the location id of the range covering `key`.
///
/// `load` resolves a node id to a decoded node; it is called once per tree
/// level. Returns `Ok(None)` when no range covers the key.
pub fn floor_search<L>(root: &BlockId, key: &Key, mut load: L) -> Result<Option<u32>>
where
    L: FnMut(&BlockId) -> Result<Arc<Node>>,
{
    let mut current = *root;

    for _ in 0..MAX_DEPTH {
        let node = load(&current)?;
        match node.as_ref() {
            Node::Branch(branch) => {
                let entry = branch.floor_child(key).ok_or_else(|| {
                    Error::StructuralCorruption(format!(
                        "branch {} has no child covering {}",
                        current, key
                    ))
                })?;
                current = entry.child;
            }
            Node::Leaf(leaf) => {
                let entry = match leaf.floor_entry(key) {
                    Some(entry) => entry,
                    None => return Ok(None),
                };
                if *key > entry.end_key()? {
                    return Ok(None);
                }
                return Ok(Some(entry.value.location_id));
            }
        }
    }

    Err(Error::StructuralCorruption(format!(
        "index deeper than {} levels below {}",
        MAX_DEPTH, root
    )))
}
