//! Dataset generation.
//!
//! Turns a locations CSV and one or more blocks CSVs into a published
//! dataset:
//!
//! 1. Parse locations, assigning dense location ids in first-seen order
//! 2. Parse network rows into `(first, last, location id)` ranges
//! 3. Sort ranges by first key, optionally filling gaps with unmapped entries
//! 4. Write the location table pages and the page list
//! 5. Build the index tree bottom-up
//! 6. Write the root metadata block; its id is the dataset handle
//!
//! # Example
//!
//! ```ignore
//! use geoblock::{DirStore, Generator, GeneratorConfig};
//! use std::path::Path;
//!
//! let mut store = DirStore::open("blocks")?;
//! let generator = Generator::new(GeneratorConfig::default())?;
//! let dataset = generator.generate_from_paths(
//!     Path::new("GeoLite2-City-Locations-en.csv"),
//!     &[Path::new("GeoLite2-City-Blocks-IPv4.csv.gz")],
//!     &mut store,
//! )?;
//! println!("root: {}", dataset.root);
//! ```

pub mod overrides;
pub mod source;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::block::{BlockId, BlockStore};
use crate::codec::{BincodeCodec, Codec};
use crate::key::Key;
use crate::location::{paginate, PageList, DEFAULT_PAGE_SIZE};
use crate::tree::{
    IndexValue, LeafEntry, RootMetadata, TreeBuilder, FORMAT_VERSION, UNMAPPED_LOCATION,
};
use crate::{Error, Result};

pub use overrides::normalize_name;
pub use source::{parse_blocks, parse_locations, LocationSource, RangeRow};

/// Default average number of entries per tree node.
pub const DEFAULT_FANOUT: usize = 32;

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

/// Configuration for dataset generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Average number of children per tree node
    pub average_fanout: usize,
    /// Number of location records per table page
    pub page_size: u32,
    /// Threads used to encode and write tree levels
    pub concurrency: usize,
    /// Store range ends as spans from the start key
    pub compact_range_ends: bool,
    /// Insert unmapped entries covering gaps between ranges
    pub fill_gaps: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            average_fanout: DEFAULT_FANOUT,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: default_concurrency(),
            compact_range_ends: true,
            fill_gaps: false,
        }
    }
}

impl GeneratorConfig {
    pub fn with_fanout(mut self, average_fanout: usize) -> Self {
        self.average_fanout = average_fanout;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_compact_range_ends(mut self, compact: bool) -> Self {
        self.compact_range_ends = compact;
        self
    }

    pub fn with_fill_gaps(mut self, fill_gaps: bool) -> Self {
        self.fill_gaps = fill_gaps;
        self
    }

    /// Reject values generation cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.average_fanout < 2 {
            return Err(Error::Config(format!(
                "average_fanout must be at least 2, got {}",
                self.average_fanout
            )));
        }
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Counters collected during one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub location_rows: u64,
    pub block_rows: u64,
    pub skipped_rows: u64,
    pub locations: u64,
    pub entries: u64,
    pub gap_entries: u64,
    pub overlapping_ranges: u64,
    pub pages: u64,
    pub index_nodes: u64,
    pub index_height: u32,
}

/// Result of a successful generation run.
#[derive(Debug, Clone)]
pub struct GeneratedDataset {
    /// Id of the root metadata block
    pub root: BlockId,
    pub metadata: RootMetadata,
    pub stats: GenerationStats,
}

/// Builds datasets from CSV sources.
pub struct Generator<C: Codec = BincodeCodec> {
    config: GeneratorConfig,
    codec: C,
}

impl Generator<BincodeCodec> {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        Self::with_codec(config, BincodeCodec::new())
    }
}

impl<C: Codec> Generator<C> {
    pub fn with_codec(config: GeneratorConfig, codec: C) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, codec })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate a dataset from CSV readers and write its blocks to `store`.
    ///
    /// Nothing is published on error: the root metadata block is written
    /// last, after every other block.
    pub fn generate<S, L, I, B>(
        &self,
        locations: L,
        blocks: I,
        store: &mut S,
    ) -> Result<GeneratedDataset>
    where
        S: BlockStore,
        L: Read,
        I: IntoIterator<Item = B>,
        B: Read,
    {
        let mut stats = GenerationStats::default();

        let mut locations = parse_locations(locations)?;
        stats.location_rows = locations.rows_read;
        stats.skipped_rows = locations.rows_skipped;

        let mut ranges = Vec::new();
        for reader in blocks {
            let counts = parse_blocks(reader, &mut locations, &mut ranges)?;
            stats.block_rows += counts.rows_read;
            stats.skipped_rows += counts.rows_skipped;
        }
        stats.locations = locations.len() as u64;

        let entries = self.index_entries(ranges, &mut stats)?;
        stats.entries = entries.len() as u64;
        log::info!(
            "Sorted {} index entries ({} gap entries)",
            stats.entries,
            stats.gap_entries
        );

        let location_table_root = self.write_location_table(&locations, store, &mut stats)?;

        let builder = TreeBuilder::with_codec(
            &self.codec,
            self.config.average_fanout,
            self.config.concurrency,
        )?;
        let tree = builder.build(&entries, store)?;
        stats.index_nodes = tree.nodes_written as u64;
        stats.index_height = tree.height;

        let metadata = RootMetadata {
            version: FORMAT_VERSION,
            index_root: tree.root,
            location_table_root,
            entry_count: stats.entries,
            location_count: stats.locations,
            page_size: self.config.page_size,
        };
        let root = store.put_block(&self.codec.encode(&metadata)?)?;
        log::info!(
            "Published dataset {} ({} entries, {} locations, height {})",
            root,
            stats.entries,
            stats.locations,
            stats.index_height
        );

        Ok(GeneratedDataset {
            root,
            metadata,
            stats,
        })
    }

    /// Generate from files on disk. Paths ending in `.gz` are decompressed.
    pub fn generate_from_paths<S, P>(
        &self,
        locations: &Path,
        blocks: &[P],
        store: &mut S,
    ) -> Result<GeneratedDataset>
    where
        S: BlockStore,
        P: AsRef<Path>,
    {
        let locations = open_source(locations)?;
        let blocks = blocks
            .iter()
            .map(|path| open_source(path.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.generate(locations, blocks, store)
    }

    /// Sort ranges and turn them into disjoint leaf entries.
    fn index_entries(
        &self,
        mut ranges: Vec<RangeRow>,
        stats: &mut GenerationStats,
    ) -> Result<Vec<LeafEntry>> {
        // Wider ranges first among equal starts, so nesting is seen outside in
        ranges.sort_by(|a, b| a.first.cmp(&b.first).then(b.last.cmp(&a.last)));
        let ranges = split_nested(ranges, stats)?;

        let mut entries = Vec::with_capacity(ranges.len());
        let mut previous_last: Option<Key> = None;

        for range in ranges {
            if self.config.fill_gaps {
                let gap = match previous_last {
                    Some(last) => (last.checked_add(1), range.first.checked_sub(1)),
                    None => (Some(Key::ZERO), range.first.checked_sub(1)),
                };
                if let (Some(gap_start), Some(gap_end)) = gap {
                    if gap_start <= gap_end {
                        entries.push(self.entry(gap_start, gap_end, UNMAPPED_LOCATION)?);
                        stats.gap_entries += 1;
                    }
                }
            }

            entries.push(self.entry(range.first, range.last, range.location_id)?);
            previous_last = Some(range.last);
        }
        Ok(entries)
    }

    fn entry(&self, first: Key, last: Key, location_id: u32) -> Result<LeafEntry> {
        let value = if self.config.compact_range_ends {
            IndexValue::compact(location_id, first, last)?
        } else {
            IndexValue::full(location_id, last)
        };
        Ok(LeafEntry::new(first, value))
    }

    fn write_location_table<S: BlockStore>(
        &self,
        locations: &LocationSource,
        store: &mut S,
        stats: &mut GenerationStats,
    ) -> Result<BlockId> {
        let pages = paginate(&locations.records, self.config.page_size);

        let mut list = PageList {
            pages: Vec::with_capacity(pages.len()),
        };
        for page in &pages {
            list.pages.push(store.put_block(&self.codec.encode(page)?)?);
        }
        stats.pages = list.pages.len() as u64;

        let root = store.put_block(&self.codec.encode(&list)?)?;
        log::info!("Wrote location table {} ({} pages)", root, stats.pages);
        Ok(root)
    }
}

/// Range still open while later, nested ranges are processed.
struct OpenRange {
    row: RangeRow,
    /// First key not yet emitted, `None` once the range is used up
    next: Option<Key>,
}

impl OpenRange {
    fn emit_until(&self, end: Key, out: &mut Vec<RangeRow>) {
        if let Some(next) = self.next {
            if next <= end {
                out.push(RangeRow {
                    first: next,
                    last: end,
                    location_id: self.row.location_id,
                });
            }
        }
    }
}

/// Rewrite nested ranges into disjoint ones; the innermost range wins.
///
/// `ranges` must be sorted by first key, wider ranges first. An exact
/// duplicate keeps the first row. Ranges that overlap without nesting cannot
/// be resolved and fail with [`Error::Source`].
fn split_nested(ranges: Vec<RangeRow>, stats: &mut GenerationStats) -> Result<Vec<RangeRow>> {
    let mut out = Vec::with_capacity(ranges.len());
    let mut open: Vec<OpenRange> = Vec::new();

    for range in ranges {
        while let Some(top) = open.last() {
            if top.row.last >= range.first {
                break;
            }
            top.emit_until(top.row.last, &mut out);
            open.pop();
        }

        if let Some(top) = open.last_mut() {
            let outer = top.row;
            if range.first == outer.first && range.last == outer.last {
                log::warn!("Skipping duplicate range {}-{}", range.first, range.last);
                stats.overlapping_ranges += 1;
                continue;
            }
            if range.last > outer.last {
                return Err(Error::Source(format!(
                    "range {}-{} partially overlaps range {}-{}",
                    range.first, range.last, outer.first, outer.last
                )));
            }

            log::warn!(
                "Range {}-{} is nested in range {}-{}, splitting",
                range.first,
                range.last,
                outer.first,
                outer.last
            );
            stats.overlapping_ranges += 1;
            if let Some(end) = range.first.checked_sub(1) {
                top.emit_until(end, &mut out);
            }
            top.next = range.last.checked_add(1);
        }

        open.push(OpenRange {
            row: range,
            next: Some(range.first),
        });
    }

    while let Some(top) = open.pop() {
        top.emit_until(top.row.last, &mut out);
    }
    Ok(out)
}

/// Open a source file, decompressing `.gz` files.
fn open_source(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path)
        .map_err(|e| Error::Source(format!("cannot open {:?}: {}", path, e)))?;
    let reader = BufReader::new(file);

    let gzipped = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if gzipped {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}
