//! 128-bit sortable key space shared by IPv4 and IPv6.
//!
//! Every address is normalized into a 16-byte big-endian key. IPv4 addresses
//! land in the IPv4-mapped block (`::ffff:a.b.c.d`), so both families sort in
//! one order and one index covers them.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::{Error, Result};

/// Key length in bytes.
pub const KEY_LEN: usize = 16;

/// Prefix of the IPv4-mapped IPv6 block (`::ffff:0:0/96`).
const IPV4_MAPPED_PREFIX: u128 = 0xffff_0000_0000;

/// A 16-byte big-endian unsigned integer.
///
/// Derived ordering compares the bytes lexicographically, which is exactly
/// unsigned integer order for big-endian encodings.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// The smallest key.
    pub const ZERO: Key = Key([0; KEY_LEN]);

    /// The largest key.
    pub const MAX: Key = Key([0xff; KEY_LEN]);

    pub fn from_u128(value: u128) -> Self {
        Key(value.to_be_bytes())
    }

    pub fn to_u128(self) -> u128 {
        u128::from_be_bytes(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Key of a parsed address.
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self::from_ipv4(v4),
            IpAddr::V6(v6) => Self::from_u128(u128::from(v6)),
        }
    }

    fn from_ipv4(ip: Ipv4Addr) -> Self {
        Self::from_u128(IPV4_MAPPED_PREFIX | u128::from(u32::from(ip)))
    }

    /// Whether the key lies in the IPv4-mapped block.
    pub fn is_ipv4_mapped(&self) -> bool {
        self.to_u128() >> 32 == IPV4_MAPPED_PREFIX >> 32
    }

    pub fn checked_add(self, delta: u128) -> Option<Self> {
        self.to_u128().checked_add(delta).map(Self::from_u128)
    }

    pub fn checked_sub(self, delta: u128) -> Option<Self> {
        self.to_u128().checked_sub(delta).map(Self::from_u128)
    }

    /// Distance from `self` up to `end`, `None` if `end` is smaller.
    pub fn span_to(self, end: Key) -> Option<u128> {
        end.to_u128().checked_sub(self.to_u128())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv4_mapped() {
            write!(f, "{}", Ipv4Addr::from(self.to_u128() as u32))
        } else {
            write!(f, "{}", Ipv6Addr::from(self.to_u128()))
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

/// Convert a dotted-quad IPv4 string into a key.
///
/// Octets are decimal in `[0, 255]`; leading zeros are accepted and do not
/// make an octet octal (`010.1.1.1` is `10.1.1.1`).
pub fn ipv4_to_key(s: &str) -> Result<Key> {
    parse_ipv4(s)
        .map(Key::from_ipv4)
        .ok_or_else(|| Error::InvalidAddress(s.to_string()))
}

fn parse_ipv4(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = s.trim().split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

/// Convert an IPv6 string into a key.
///
/// Accepts `::` compression and an embedded IPv4 suffix such as
/// `::ffff:1.2.3.4`.
pub fn ipv6_to_key(s: &str) -> Result<Key> {
    let ip: Ipv6Addr = s
        .trim()
        .parse()
        .map_err(|_| Error::InvalidAddress(s.to_string()))?;
    Ok(Key::from_u128(u128::from(ip)))
}

/// Parse an address of either family. IPv4 follows [`ipv4_to_key`].
pub fn parse_ip(s: &str) -> Result<IpAddr> {
    let parsed = if s.contains(':') {
        s.trim().parse::<Ipv6Addr>().ok().map(IpAddr::V6)
    } else {
        parse_ipv4(s).map(IpAddr::V4)
    };
    parsed.ok_or_else(|| Error::InvalidAddress(s.to_string()))
}

/// Convert an address of either family into a key.
pub fn ip_to_key(s: &str) -> Result<Key> {
    if s.contains(':') {
        ipv6_to_key(s)
    } else {
        ipv4_to_key(s)
    }
}

/// First and last key of a CIDR network. Host bits of the address are
/// ignored.
pub fn cidr_to_range(cidr: &str) -> Result<(Key, Key)> {
    let net: IpNet = cidr
        .trim()
        .parse()
        .map_err(|_| Error::InvalidCidr(cidr.to_string()))?;

    let range = match net {
        IpNet::V4(v4) => (Key::from_ipv4(v4.network()), Key::from_ipv4(v4.broadcast())),
        IpNet::V6(v6) => (
            Key::from_u128(u128::from(v6.network())),
            Key::from_u128(u128::from(v6.broadcast())),
        ),
    };
    Ok(range)
}

/// Compare two keys as big-endian unsigned integers.
pub fn compare_keys(a: &Key, b: &Key) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

/// Private, loopback or link-local IPv4 address.
pub fn is_local_ipv4(ip: &Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local()
}

/// Loopback, link-local (`fe80::/10`) or unique-local (`fc00::/7`) IPv6
/// address, or an IPv4-mapped address that is local.
pub fn is_local_ipv6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_local_ipv4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback() || (first & 0xffc0) == 0xfe80 || (first & 0xfe00) == 0xfc00
}

/// Whether an address is known to be unroutable on the public internet.
pub fn is_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_ipv4(v4),
        IpAddr::V6(v6) => is_local_ipv6(v6),
    }
}
