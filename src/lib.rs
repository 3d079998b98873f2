//! Raw probe socket configuration.
//!
//! Three setup primitives for an agent that sends and receives raw TCP
//! probes:
//!
//! - [`bind_to_device`]: restrict a socket to one network interface.
//! - [`attach_filter`]: install a pre-assembled classic BPF program.
//! - [`build_ipv4_header`] / [`serialization_options`]: IPv4 header values
//!   for outgoing probes and the policy they are serialized with.
//!
//! Platform backends live under [`socket`]; targets without an equivalent
//! mechanism return [`ProbeError::UnsupportedPlatform`].

pub mod cli;
pub mod error;
pub mod filter;
pub mod header;
pub mod output;
pub mod packet;
pub mod selftest;
pub mod socket;

pub use error::ProbeError;
pub use filter::{FilterProgram, SockFilter, SockFprog};
pub use header::{
    IP_TTL, IPV4_VERSION, IpProtocol, Ipv4HeaderFields, SerializeOptions, build_ipv4_header,
    serialization_options,
};
pub use socket::{
    PlatformSocketOptions, SocketOptions, attach_filter, attach_filter_with, bind_to_device,
    bind_to_device_with,
};
