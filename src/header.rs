//! IPv4 header field values for outgoing probes.
//!
//! Only the fields a probe chooses are produced here. Total length and
//! checksum are always left to the serializer (see [`serialization_options`]).

use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

/// IP version stamped on every probe.
pub const IPV4_VERSION: u8 = 4;

/// Time-to-live stamped on every probe.
pub const IP_TTL: u8 = 64;

/// Transport protocol numbers (IANA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl IpProtocol {
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Icmp => write!(f, "ICMP"),
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

/// Header values for one outgoing IPv4 probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Ipv4HeaderFields {
    pub version: u8,
    pub tos: u8,
    pub protocol: IpProtocol,
    pub ttl: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

/// Build the header fields for a TCP probe from `source` to `destination`.
///
/// `_transport_len` is accepted so callers share one signature with header
/// variants that need it; lengths are fixed up by the serializer instead.
pub fn build_ipv4_header(
    tos: u8,
    _transport_len: u16,
    source: Ipv4Addr,
    destination: Ipv4Addr,
) -> Ipv4HeaderFields {
    Ipv4HeaderFields {
        version: IPV4_VERSION,
        tos,
        protocol: IpProtocol::Tcp,
        ttl: IP_TTL,
        source,
        destination,
    }
}

/// Serializer behaviour for probe packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SerializeOptions {
    /// Recompute IPv4 and TCP checksums.
    pub compute_checksums: bool,
    /// Recompute length fields from the actual header and payload sizes.
    pub fix_lengths: bool,
}

/// Options every probe is serialized with. Not configurable.
pub const fn serialization_options() -> SerializeOptions {
    SerializeOptions {
        compute_checksums: true,
        fix_lengths: true,
    }
}
