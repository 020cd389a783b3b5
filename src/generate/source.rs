//! CSV source parsing.
//!
//! Two inputs feed the generator: a locations file with one row per geoname,
//! and one or more blocks files mapping networks to geonames. Columns are
//! looked up by header name so column order and extra columns do not matter.

use ahash::AHashMap;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::io::Read;

use super::overrides::normalize_name;
use crate::key::{cidr_to_range, Key};
use crate::location::LocationRecord;
use crate::{Error, Result};

/// Locations parsed from the locations file.
#[derive(Debug, Default)]
pub struct LocationSource {
    /// Records in first-seen order; `records[i]` has location id `i + 1`
    pub records: Vec<LocationRecord>,
    /// Geoname id to location id
    pub ids: AHashMap<String, u32>,
    /// Location ids whose coordinates were already filled from a block row
    augmented: Vec<bool>,
    pub rows_read: u64,
    pub rows_skipped: u64,
}

impl LocationSource {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Location id of a geoname, if known.
    pub fn location_id(&self, geoname_id: &str) -> Option<u32> {
        self.ids.get(geoname_id).copied()
    }

    /// Fill postal code and coordinates from the first block row that names
    /// a location.
    fn augment(
        &mut self,
        location_id: u32,
        postal_code: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) {
        let index = (location_id - 1) as usize;
        if self.augmented.get(index).copied().unwrap_or(true) {
            return;
        }
        if let Some(record) = self.records.get_mut(index) {
            record.postal_code = postal_code.to_string();
            record.latitude = latitude;
            record.longitude = longitude;
        }
        self.augmented[index] = true;
    }
}

/// One network range taken from a blocks file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRow {
    pub first: Key,
    pub last: Key,
    pub location_id: u32,
}

/// Row counters of one blocks file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCounts {
    pub rows_read: u64,
    pub rows_skipped: u64,
}

/// Column positions resolved from a header row.
struct Columns {
    headers: StringRecord,
}

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        Self {
            headers: headers.clone(),
        }
    }

    fn index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::Source(format!("missing column '{}'", name)))
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader)
}

fn field<'r>(record: &'r StringRecord, index: usize) -> &'r str {
    record.get(index).unwrap_or("")
}

/// Parse a locations file.
///
/// Location ids are assigned densely from `1` in first-seen order. Country
/// names are keyed by country code and normalized, the last row of a code
/// naming the country. Rows without a geoname id are skipped; a repeated
/// geoname id keeps its first row.
pub fn parse_locations<R: Read>(reader: R) -> Result<LocationSource> {
    let mut csv = csv_reader(reader);
    let columns = Columns::new(csv.headers()?);
    let geoname = columns.index("geoname_id")?;
    let country_code = columns.index("country_iso_code")?;
    let country_name = columns.index("country_name")?;
    let region_code = columns.index("subdivision_1_iso_code")?;
    let city = columns.index("city_name")?;

    let mut rows = Vec::new();
    let mut countries: AHashMap<String, String> = AHashMap::new();
    let mut source = LocationSource::default();

    for record in csv.records() {
        let record = record?;
        source.rows_read += 1;

        let code = field(&record, country_code);
        let name = field(&record, country_name);
        if !code.is_empty() && !name.is_empty() {
            countries.insert(code.to_string(), normalize_name(name).to_string());
        }
        rows.push(record);
    }

    for record in rows {
        let geoname_id = field(&record, geoname);
        if geoname_id.is_empty() {
            log::debug!("Skipping location row without geoname id");
            source.rows_skipped += 1;
            continue;
        }
        if source.ids.contains_key(geoname_id) {
            log::warn!("Duplicate location row for geoname {}", geoname_id);
            source.rows_skipped += 1;
            continue;
        }

        let code = field(&record, country_code);
        let country = countries
            .get(code)
            .cloned()
            .unwrap_or_else(|| normalize_name(field(&record, country_name)).to_string());

        source.records.push(LocationRecord {
            country_name: country,
            country_code: code.to_string(),
            region_code: field(&record, region_code).to_string(),
            city: normalize_name(field(&record, city)).to_string(),
            ..Default::default()
        });
        source.augmented.push(false);

        let location_id = source.records.len() as u32;
        source.ids.insert(geoname_id.to_string(), location_id);
    }

    log::info!(
        "Parsed {} locations from {} rows",
        source.len(),
        source.rows_read
    );
    Ok(source)
}

fn parse_coordinate(value: &str, column: &str, network: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            log::warn!("Ignoring unparsable {} '{}' for {}", column, value, network);
            None
        }
    }
}

/// Parse a blocks file, appending its ranges to `ranges`.
///
/// Rows whose geoname is missing or unknown are skipped. A network that does
/// not parse aborts parsing.
pub fn parse_blocks<R: Read>(
    reader: R,
    locations: &mut LocationSource,
    ranges: &mut Vec<RangeRow>,
) -> Result<BlockCounts> {
    let mut csv = csv_reader(reader);
    let columns = Columns::new(csv.headers()?);
    let network = columns.index("network")?;
    let geoname = columns.index("geoname_id")?;
    let postal_code = columns.index("postal_code")?;
    let latitude = columns.index("latitude")?;
    let longitude = columns.index("longitude")?;

    let mut counts = BlockCounts::default();

    for record in csv.records() {
        let record = record?;
        counts.rows_read += 1;

        let cidr = field(&record, network);
        let (first, last) = cidr_to_range(cidr).map_err(|_| {
            Error::Source(format!(
                "invalid network '{}' in blocks row {}",
                cidr, counts.rows_read
            ))
        })?;

        let geoname_id = field(&record, geoname);
        let location_id = match locations.location_id(geoname_id) {
            Some(id) => id,
            None => {
                log::debug!("Skipping {}: unknown geoname '{}'", cidr, geoname_id);
                counts.rows_skipped += 1;
                continue;
            }
        };

        locations.augment(
            location_id,
            field(&record, postal_code),
            parse_coordinate(field(&record, latitude), "latitude", cidr),
            parse_coordinate(field(&record, longitude), "longitude", cidr),
        );

        ranges.push(RangeRow {
            first,
            last,
            location_id,
        });
    }

    log::info!(
        "Parsed {} ranges from {} block rows",
        counts.rows_read - counts.rows_skipped,
        counts.rows_read
    );
    Ok(counts)
}
