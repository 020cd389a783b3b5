//! Lookups over a list of candidate addresses.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::LookupEngine;
use crate::block::{BlockFetcher, BlockId};
use crate::codec::Codec;
use crate::key::{is_local, parse_ip};
use crate::location::{Location, PrettyLocation};
use crate::{Error, Result};

/// Address named by a lookup candidate.
///
/// Candidates are either multiaddr-style (`/ip4/<addr>/...`,
/// `/ip6/<addr>/...`) or bare addresses. Returns `None` for other protocols
/// and for addresses that do not parse.
pub fn parse_candidate(candidate: &str) -> Option<IpAddr> {
    let candidate = candidate.trim();
    if !candidate.starts_with('/') {
        return parse_ip(candidate).ok();
    }

    let mut parts = candidate.split('/').skip(1);
    let protocol = parts.next()?;
    let address = parts.next()?;
    match protocol {
        "ip4" => address.parse::<Ipv4Addr>().ok().map(IpAddr::V4),
        "ip6" => address.parse::<Ipv6Addr>().ok().map(IpAddr::V6),
        _ => None,
    }
}

impl<F: BlockFetcher, C: Codec> LookupEngine<F, C> {
    /// Resolve the first usable candidate address and describe it.
    ///
    /// Candidates with an unsupported protocol, an invalid address or a
    /// local address are skipped, as are candidates whose range is unmapped.
    /// The first result with a country name wins. If no candidate has one,
    /// the first result without a country name is returned instead. Fetch,
    /// decode and corruption errors are returned immediately.
    pub fn lookup_pretty<I, S>(&self, root: &BlockId, candidates: I) -> Result<PrettyLocation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut partial: Option<Location> = None;

        for candidate in candidates {
            let candidate = candidate.as_ref();
            let ip = match parse_candidate(candidate) {
                Some(ip) => ip,
                None => {
                    log::debug!("Skipping unsupported candidate '{}'", candidate);
                    continue;
                }
            };
            if is_local(&ip) {
                log::debug!("Skipping local candidate {}", ip);
                continue;
            }

            match self.lookup(root, &ip.to_string()) {
                Ok(location) if location.country_name.is_empty() => {
                    partial.get_or_insert(location);
                }
                Ok(location) => return Ok(PrettyLocation::from(location)),
                Err(e) if e.is_unmapped() => continue,
                Err(e) => return Err(e),
            }
        }

        partial.map(PrettyLocation::from).ok_or(Error::UnmappedRange)
    }
}
