//! Location records and the paged location table.
//!
//! Records are stored in a dense array addressed by location id and split into
//! fixed-size pages, one block each. A list block names the pages in order.
//! Id `0` is the unmapped sentinel, so slot `0` of the first page is empty.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::block::BlockId;

/// Name of the planet reported with every location.
pub const PLANET: &str = "Earth";

/// Default number of records per page.
pub const DEFAULT_PAGE_SIZE: u32 = 256;

/// A deduplicated location as stored in the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub country_name: String,
    pub country_code: String,
    pub region_code: String,
    pub city: String,
    pub postal_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// One page of the location table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPage {
    pub records: Vec<Option<LocationRecord>>,
}

impl LocationPage {
    /// Record at `offset`, if the slot exists and is filled.
    pub fn get(&self, offset: usize) -> Option<&LocationRecord> {
        self.records.get(offset).and_then(Option::as_ref)
    }
}

/// Root block of the location table: page ids in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageList {
    pub pages: Vec<BlockId>,
}

/// Page index and offset within the page of a location id.
pub fn page_position(location_id: u32, page_size: u32) -> (usize, usize) {
    let page_size = page_size.max(1);
    (
        (location_id / page_size) as usize,
        (location_id % page_size) as usize,
    )
}

/// Split records into pages. `records[i]` receives location id `i + 1`.
pub fn paginate(records: &[LocationRecord], page_size: u32) -> Vec<LocationPage> {
    let page_size = page_size.max(1) as usize;

    let slots = std::iter::once(None).chain(records.iter().cloned().map(Some));
    let mut pages = Vec::with_capacity((records.len() + 1) / page_size + 1);
    let mut current = Vec::with_capacity(page_size);

    for slot in slots {
        current.push(slot);
        if current.len() == page_size {
            pages.push(LocationPage {
                records: std::mem::replace(&mut current, Vec::with_capacity(page_size)),
            });
        }
    }
    if !current.is_empty() {
        pages.push(LocationPage { records: current });
    }
    pages
}

fn is_empty(s: &str) -> bool {
    s.is_empty()
}

fn default_planet() -> String {
    PLANET.to_string()
}

/// Location as returned by lookups.
///
/// Empty fields are left out of the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub country_name: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub country_code: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub region_code: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub city: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub postal_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default = "default_planet")]
    pub planet: String,
}

impl Location {
    /// `"City, Region, Country, Earth"` with empty parts left out.
    pub fn formatted(&self) -> String {
        [
            self.city.as_str(),
            self.region_code.as_str(),
            self.country_name.as_str(),
            self.planet.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
    }
}

impl From<LocationRecord> for Location {
    fn from(record: LocationRecord) -> Self {
        Self {
            country_name: record.country_name,
            country_code: record.country_code,
            region_code: record.region_code,
            city: record.city,
            postal_code: record.postal_code,
            latitude: record.latitude,
            longitude: record.longitude,
            planet: default_planet(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

/// Location plus its one-line description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrettyLocation {
    #[serde(flatten)]
    pub location: Location,
    pub formatted: String,
}

impl From<Location> for PrettyLocation {
    fn from(location: Location) -> Self {
        let formatted = location.formatted();
        Self {
            location,
            formatted,
        }
    }
}
