// ============================================
// File: crates/nextun-common/src/ip.rs
// ============================================
//! # IPv4 Address and Network Values
//!
//! ## Creation Reason
//! Client addresses and the server subnet are allocated and compared as
//! plain 4-byte values. `Ip` and `IpNet` give those values a fixed,
//! copyable representation with exact text and integer conversions.
//!
//! ## Main Functionality
//! - `Ip`: immutable 4-byte address, big-endian `u32` conversion, text parsing
//! - `IpNet`: address plus prefix length, parsed from CIDR text
//!
//! ## Parsing Policy
//! - Address text fails fast with [`ParseError`]. Anything `std` parses as an
//!   IP is accepted as long as it has an IPv4 form (IPv4-mapped IPv6 is
//!   truncated to its last four bytes).
//! - [`Ip::parse_or_unspecified`] keeps the old zero-address fallback under
//!   an explicit name for callers that want it.
//! - `IpNet` keeps the host bits of the parsed address: `10.8.0.1/24` stores
//!   `10.8.0.1`, not `10.8.0.0`. Use [`IpNet::network`] for the base address.
//! - `IpNet` text is IPv4 only. Unlike [`Ip::parse`], mapped IPv6 networks
//!   such as `::ffff:10.0.0.1/120` are rejected with `NotIpv4`, since their
//!   prefix counts 128 bits.
//!
//! ## Example
//! ```
//! use nextun_common::ip::{Ip, IpNet};
//!
//! let ip = Ip::from_u32(0x0a08_0001);
//! assert_eq!(ip.to_string(), "10.8.0.1");
//! assert_eq!(ip.to_u32(), 0x0a08_0001);
//!
//! let net: IpNet = "10.8.0.1/24".parse().unwrap();
//! assert_eq!(net.ip(), ip);
//! assert_eq!(net.network().to_string(), "10.8.0.0");
//! assert_eq!(net.to_string(), "10.8.0.1/24");
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial address types

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Number of bits in an IPv4 address.
pub const IPV4_BITS: u8 = 32;

// ============================================
// Ip
// ============================================

/// A 4-byte IPv4 address.
///
/// Ordering and hashing follow the big-endian integer value, so sorted
/// collections of `Ip` are in address order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Ip([u8; 4]);

impl Ip {
    /// The all-zero address, `0.0.0.0`.
    pub const UNSPECIFIED: Self = Self([0; 4]);

    /// Creates an address from its four octets.
    #[must_use]
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    /// Creates an address from a 4-byte array.
    #[must_use]
    pub const fn from_octets(octets: [u8; 4]) -> Self {
        Self(octets)
    }

    /// Returns the four octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 4] {
        self.0
    }

    /// Creates an address from its big-endian integer value.
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// Returns the big-endian integer value of this address.
    #[must_use]
    pub const fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Parses address text.
    ///
    /// # Errors
    /// - `InvalidAddress` if the text is not an IP address
    /// - `NotIpv4` if it is an IPv6 address without an IPv4 form
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let addr: IpAddr = s.parse().map_err(|_| ParseError::invalid_address(s))?;
        Self::from_ip_addr(addr).ok_or_else(|| ParseError::NotIpv4 {
            input: s.to_string(),
        })
    }

    /// Parses address text, returning `0.0.0.0` for anything unparsable.
    ///
    /// Only for callers that treat the zero address as "not set".
    #[must_use]
    pub fn parse_or_unspecified(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::UNSPECIFIED)
    }

    /// Copies the IPv4 form out of a `std` address.
    ///
    /// Returns `None` for IPv6 addresses that are not IPv4-mapped.
    #[must_use]
    pub fn from_ip_addr(addr: IpAddr) -> Option<Self> {
        match addr {
            IpAddr::V4(v4) => Some(Self::from(v4)),
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(Self::from),
        }
    }

    /// Returns the address `n` positions after this one, if it fits.
    #[must_use]
    pub const fn checked_add(&self, n: u32) -> Option<Self> {
        match self.to_u32().checked_add(n) {
            Some(v) => Some(Self::from_u32(v)),
            None => None,
        }
    }

    /// Returns `true` for `0.0.0.0`.
    #[must_use]
    pub const fn is_unspecified(&self) -> bool {
        self.to_u32() == 0
    }
}

impl fmt::Display for Ip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl fmt::Debug for Ip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ip({self})")
    }
}

impl FromStr for Ip {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Ipv4Addr> for Ip {
    fn from(addr: Ipv4Addr) -> Self {
        Self(addr.octets())
    }
}

impl From<Ip> for Ipv4Addr {
    fn from(ip: Ip) -> Self {
        Self::from(ip.0)
    }
}

impl From<[u8; 4]> for Ip {
    fn from(octets: [u8; 4]) -> Self {
        Self(octets)
    }
}

impl From<u32> for Ip {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl From<Ip> for u32 {
    fn from(ip: Ip) -> Self {
        ip.to_u32()
    }
}

impl Serialize for Ip {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ip {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// IpNet
// ============================================

/// An IPv4 address with a prefix length, as written in CIDR notation.
///
/// The address is kept exactly as given; host bits are not cleared.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNet {
    ip: Ip,
    prefix_len: u8,
}

impl IpNet {
    /// Creates a network from an address and a prefix length.
    ///
    /// # Errors
    /// Returns `InvalidCidr` if `prefix_len` exceeds 32.
    pub fn new(ip: Ip, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > IPV4_BITS {
            return Err(ParseError::invalid_cidr(
                format!("{ip}/{prefix_len}"),
                "prefix length exceeds 32",
            ));
        }
        Ok(Self { ip, prefix_len })
    }

    /// Creates a network, treating prefix lengths above 32 as 32.
    #[must_use]
    pub const fn new_clamped(ip: Ip, prefix_len: u8) -> Self {
        let prefix_len = if prefix_len > IPV4_BITS {
            IPV4_BITS
        } else {
            prefix_len
        };
        Self { ip, prefix_len }
    }

    /// Returns the address as parsed (host bits retained).
    #[must_use]
    pub const fn ip(&self) -> Ip {
        self.ip
    }

    /// Returns the prefix length.
    #[must_use]
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns the subnet mask as an integer.
    #[must_use]
    pub const fn mask_bits(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (IPV4_BITS - self.prefix_len)
        }
    }

    /// Returns the subnet mask (e.g. `255.255.255.0` for `/24`).
    #[must_use]
    pub const fn mask(&self) -> Ip {
        Ip::from_u32(self.mask_bits())
    }

    /// Returns the base address with host bits cleared.
    #[must_use]
    pub const fn network(&self) -> Ip {
        Ip::from_u32(self.ip.to_u32() & self.mask_bits())
    }

    /// Returns the broadcast address with all host bits set.
    #[must_use]
    pub const fn broadcast(&self) -> Ip {
        Ip::from_u32(self.ip.to_u32() | !self.mask_bits())
    }

    /// Returns the number of addresses covered, including network and broadcast.
    #[must_use]
    pub const fn size(&self) -> u64 {
        1u64 << (IPV4_BITS - self.prefix_len)
    }

    /// Returns `true` if `ip` lies inside this network.
    #[must_use]
    pub const fn contains(&self, ip: Ip) -> bool {
        ip.to_u32() & self.mask_bits() == self.network().to_u32()
    }

    /// Returns the `std` address and prefix length.
    #[must_use]
    pub fn to_native(&self) -> (Ipv4Addr, u8) {
        (self.ip.into(), self.prefix_len)
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}

impl fmt::Debug for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IpNet({self})")
    }
}

impl FromStr for IpNet {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| ParseError::invalid_cidr(s, "expected address/prefix"))?;

        let ip: Ipv4Addr = addr.parse().map_err(|_| {
            if addr.parse::<IpAddr>().is_ok() {
                ParseError::NotIpv4 {
                    input: s.to_string(),
                }
            } else {
                ParseError::invalid_cidr(s, "invalid address")
            }
        })?;

        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::invalid_cidr(s, "invalid prefix length"));
        }
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| ParseError::invalid_cidr(s, "invalid prefix length"))?;
        if prefix_len > IPV4_BITS {
            return Err(ParseError::invalid_cidr(s, "prefix length exceeds 32"));
        }

        Ok(Self {
            ip: ip.into(),
            prefix_len,
        })
    }
}

impl Serialize for IpNet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpNet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// Tests
// ============================================
