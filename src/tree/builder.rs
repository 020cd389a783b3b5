//! Bottom-up index tree construction.
//!
//! Node boundaries are chosen by content-defined chunking: a rolling hash over
//! the last few items of a level decides where a node ends, so inserting or
//! changing one entry only reshapes the nodes around it. Unchanged regions
//! encode to the same bytes and keep their block ids across dataset versions.

use parking_lot::Mutex;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::ops::Range;

use super::{Branch, BranchEntry, IndexValue, Leaf, LeafEntry, Node, RangeEnd};
use crate::block::{BlockId, BlockStore};
use crate::codec::{BincodeCodec, Codec};
use crate::key::Key;
use crate::{Error, Result};

/// Number of trailing items mixed into the rolling boundary hash.
const WINDOW: usize = 4;

/// Hard cap on node length, as a multiple of the average fanout.
const MAX_NODE_FACTOR: usize = 4;

/// Result of building a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTree {
    /// Id of the root node
    pub root: BlockId,
    /// Number of levels, leaves included
    pub height: u32,
    /// Number of nodes encoded and written
    pub nodes_written: usize,
}

/// Builds an index tree from sorted leaf entries.
pub struct TreeBuilder<C: Codec = BincodeCodec> {
    codec: C,
    average_fanout: usize,
    pool: rayon::ThreadPool,
}

impl TreeBuilder<BincodeCodec> {
    /// Builder with the default codec.
    pub fn new(average_fanout: usize, concurrency: usize) -> Result<Self> {
        Self::with_codec(BincodeCodec::new(), average_fanout, concurrency)
    }
}

impl<C: Codec> TreeBuilder<C> {
    /// Builder with a custom codec.
    ///
    /// `concurrency` bounds the threads used to encode and write one level.
    pub fn with_codec(codec: C, average_fanout: usize, concurrency: usize) -> Result<Self> {
        if average_fanout < 2 {
            return Err(Error::Config(format!(
                "average fanout must be at least 2, got {}",
                average_fanout
            )));
        }
        if concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("geoblock-build-{}", i))
            .build()
            .map_err(|e| Error::Config(format!("failed to start build pool: {}", e)))?;

        Ok(Self {
            codec,
            average_fanout,
            pool,
        })
    }

    /// Build the tree and write every node to `store`.
    ///
    /// `entries` must be sorted by key with non-overlapping ranges. An empty
    /// input yields a single empty leaf.
    pub fn build<S: BlockStore>(&self, entries: &[LeafEntry], store: &mut S) -> Result<BuiltTree> {
        let sink = Mutex::new(store);

        if entries.is_empty() {
            let id = self.write_node(&Node::Leaf(Leaf::default()), &sink)?;
            return Ok(BuiltTree {
                root: id,
                height: 1,
                nodes_written: 1,
            });
        }

        let hashes: Vec<u64> = self
            .pool
            .install(|| entries.par_iter().map(entry_hash).collect());
        let ranges = chunk_ranges(&hashes, self.average_fanout);
        let mut nodes_written = ranges.len();

        let mut summaries = self.write_level(&ranges, &sink, |range| {
            let slice = &entries[range.clone()];
            (slice[0].key, Node::Leaf(Leaf { entries: slice.to_vec() }))
        })?;
        log::info!(
            "Built {} leaves from {} entries",
            summaries.len(),
            entries.len()
        );

        // The leftmost spine covers the key space from zero
        if let Some(first) = summaries.first_mut() {
            first.min_key = Key::ZERO;
        }

        let mut level = 0u32;
        while summaries.len() > 1 {
            level += 1;
            let hashes: Vec<u64> = summaries.iter().map(|s| s.child.prefix_u64()).collect();
            let ranges = chunk_ranges(&hashes, self.average_fanout);
            nodes_written += ranges.len();

            let children = &summaries;
            let next = self.write_level(&ranges, &sink, |range| {
                let slice = &children[range.clone()];
                let branch = Branch {
                    level,
                    children: slice.to_vec(),
                };
                (slice[0].min_key, Node::Branch(branch))
            })?;
            log::info!("Built level {} with {} nodes", level, next.len());
            summaries = next;
        }

        let root = summaries
            .first()
            .map(|s| s.child)
            .ok_or_else(|| Error::StructuralCorruption("tree build produced no root".to_string()))?;

        Ok(BuiltTree {
            root,
            height: level + 1,
            nodes_written,
        })
    }

    /// Encode and write one level in parallel, returning per-node summaries
    /// in key order.
    fn write_level<S, F>(
        &self,
        ranges: &[Range<usize>],
        sink: &Mutex<&mut S>,
        make_node: F,
    ) -> Result<Vec<BranchEntry>>
    where
        S: BlockStore,
        F: Fn(&Range<usize>) -> (Key, Node) + Sync,
    {
        self.pool.install(|| {
            ranges
                .par_iter()
                .map(|range| {
                    let (min_key, node) = make_node(range);
                    let child = self.write_node(&node, sink)?;
                    Ok(BranchEntry { min_key, child })
                })
                .collect()
        })
    }

    fn write_node<S: BlockStore>(&self, node: &Node, sink: &Mutex<&mut S>) -> Result<BlockId> {
        let bytes = self.codec.encode(node)?;
        let id = BlockId::of(&bytes);
        sink.lock().put(&id, &bytes)?;
        Ok(id)
    }
}

/// Chunking hash of a leaf entry.
fn entry_hash(entry: &LeafEntry) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(entry.key.as_bytes());
    value_digest(&mut hasher, &entry.value);
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn value_digest(hasher: &mut Sha256, value: &IndexValue) {
    hasher.update(value.location_id.to_be_bytes());
    match value.end {
        RangeEnd::Full(end) => {
            hasher.update([0u8]);
            hasher.update(end.as_bytes());
        }
        RangeEnd::Span(span) => {
            hasher.update([1u8]);
            hasher.update(span.to_be_bytes());
        }
    }
}

/// Split a level into contiguous node ranges.
///
/// A node ends after item `i` when the rolling hash of items `i-3..=i` falls
/// below `u64::MAX / fanout`, giving nodes of `fanout` items on average, or
/// when the node reaches `fanout * 4` items. The rolling hash only depends on
/// nearby items, so boundaries away from an edit do not move.
pub fn chunk_ranges(hashes: &[u64], fanout: usize) -> Vec<Range<usize>> {
    let fanout = fanout.max(2);
    let threshold = u64::MAX / fanout as u64;
    let max_len = fanout * MAX_NODE_FACTOR;

    let mut ranges = Vec::with_capacity(hashes.len() / fanout + 1);
    let mut start = 0;

    for i in 0..hashes.len() {
        let mut window = 0u64;
        for back in 0..WINDOW.min(i + 1) {
            window ^= hashes[i - back].rotate_left(back as u32);
        }

        if window < threshold || i + 1 - start >= max_len {
            ranges.push(start..i + 1);
            start = i + 1;
        }
    }
    if start < hashes.len() {
        ranges.push(start..hashes.len());
    }

    // A level that does not shrink would never reach a single root
    if hashes.len() > 1 && ranges.len() >= hashes.len() {
        log::debug!(
            "Content-defined chunking made no progress on {} items, using fixed chunks",
            hashes.len()
        );
        return fixed_ranges(hashes.len(), fanout);
    }
    ranges
}

fn fixed_ranges(len: usize, size: usize) -> Vec<Range<usize>> {
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}
