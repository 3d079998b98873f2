// Wire serialization of IPv4 + TCP probe packets.
//
// Writes a 20-byte IPv4 header (no options) and a 20-byte TCP header (no
// options) followed by the payload. Length and checksum fields are driven by
// `SerializeOptions`; probes are always built with `serialization_options()`.

use std::net::Ipv4Addr;

use serde::Serialize;

use crate::error::ProbeError;
use crate::header::{Ipv4HeaderFields, SerializeOptions};

pub const IPV4_HLEN: usize = 20;
pub const TCP_HLEN: usize = 20;

/// Largest payload whose packet length still fits the IPv4 total length.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - IPV4_HLEN - TCP_HLEN;

// IPv4 field offsets
const IPV4_TOTAL_LEN_OFFSET: usize = 2;
const IPV4_TTL_OFFSET: usize = 8;
const IPV4_PROTO_OFFSET: usize = 9;
const IPV4_CSUM_OFFSET: usize = 10;
const IPV4_SRC_OFFSET: usize = 12;
const IPV4_DST_OFFSET: usize = 16;

// TCP field offsets (relative to the TCP header)
const TCP_DATA_OFFSET_OFFSET: usize = 12;
const TCP_FLAGS_OFFSET: usize = 13;
const TCP_CSUM_OFFSET: usize = 16;

/// TCP flag bits.
pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;

/// TCP header values for a probe segment.
///
/// `data_offset` and `checksum` are placeholders: they are only written
/// verbatim when the matching serializer option is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TcpProbe {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub urgent: u16,
    pub data_offset: u8,
    pub checksum: u16,
}

impl TcpProbe {
    /// A bare SYN with no options.
    pub fn syn(src_port: u16, dst_port: u16, seq: u32) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack: 0,
            flags: TCP_SYN,
            window: 65_535,
            urgent: 0,
            data_offset: 0,
            checksum: 0,
        }
    }
}

/// Serialize `header` + `tcp` + `payload` into wire bytes.
///
/// Fails with [`ProbeError::PacketTooLarge`] when the packet would not fit
/// the 16-bit IPv4 total length.
pub fn serialize_tcp_probe(
    header: &Ipv4HeaderFields,
    tcp: &TcpProbe,
    payload: &[u8],
    opts: SerializeOptions,
) -> Result<Vec<u8>, ProbeError> {
    let total_len = IPV4_HLEN + TCP_HLEN + payload.len();
    let wire_len = u16::try_from(total_len).map_err(|_| ProbeError::PacketTooLarge {
        len: total_len,
        max: u16::MAX as usize,
    })?;
    let mut buf = vec![0u8; total_len];

    // --- IPv4 header ---
    buf[0] = (header.version << 4) | (IPV4_HLEN / 4) as u8;
    buf[1] = header.tos;
    if opts.fix_lengths {
        buf[IPV4_TOTAL_LEN_OFFSET..IPV4_TOTAL_LEN_OFFSET + 2]
            .copy_from_slice(&wire_len.to_be_bytes());
    }
    // identification, flags, fragment offset: zero (kernel assigns an ID)
    buf[IPV4_TTL_OFFSET] = header.ttl;
    buf[IPV4_PROTO_OFFSET] = header.protocol.number();
    buf[IPV4_SRC_OFFSET..IPV4_SRC_OFFSET + 4].copy_from_slice(&header.source.octets());
    buf[IPV4_DST_OFFSET..IPV4_DST_OFFSET + 4].copy_from_slice(&header.destination.octets());

    // --- TCP header ---
    let t = IPV4_HLEN;
    buf[t..t + 2].copy_from_slice(&tcp.src_port.to_be_bytes());
    buf[t + 2..t + 4].copy_from_slice(&tcp.dst_port.to_be_bytes());
    buf[t + 4..t + 8].copy_from_slice(&tcp.seq.to_be_bytes());
    buf[t + 8..t + 12].copy_from_slice(&tcp.ack.to_be_bytes());
    let data_offset = if opts.fix_lengths {
        (TCP_HLEN / 4) as u8
    } else {
        tcp.data_offset
    };
    buf[t + TCP_DATA_OFFSET_OFFSET] = data_offset << 4;
    buf[t + TCP_FLAGS_OFFSET] = tcp.flags;
    buf[t + 14..t + 16].copy_from_slice(&tcp.window.to_be_bytes());
    buf[t + 18..t + 20].copy_from_slice(&tcp.urgent.to_be_bytes());
    buf[t + TCP_HLEN..].copy_from_slice(payload);

    // TCP checksum first: it does not cover the IPv4 checksum field.
    let tcp_csum = if opts.compute_checksums {
        tcp_checksum(&buf[t..], header.source, header.destination)
    } else {
        tcp.checksum
    };
    buf[t + TCP_CSUM_OFFSET..t + TCP_CSUM_OFFSET + 2].copy_from_slice(&tcp_csum.to_be_bytes());

    if opts.compute_checksums {
        let ip_csum = ipv4_checksum(&buf[..IPV4_HLEN]);
        buf[IPV4_CSUM_OFFSET..IPV4_CSUM_OFFSET + 2].copy_from_slice(&ip_csum.to_be_bytes());
    }

    Ok(buf)
}

/// True if `received` carries the same addresses and TCP header as `sent`.
///
/// The IPv4 identification and checksum may be rewritten by the kernel on
/// send, so only addresses and the TCP header are compared.
pub fn is_same_probe(received: &[u8], sent: &[u8]) -> bool {
    if received.len() < IPV4_HLEN || sent.len() < IPV4_HLEN + TCP_HLEN {
        return false;
    }
    let ihl = (received[0] & 0x0F) as usize * 4;
    if ihl < IPV4_HLEN || received.len() < ihl + TCP_HLEN {
        return false;
    }
    received[IPV4_SRC_OFFSET..IPV4_DST_OFFSET + 4] == sent[IPV4_SRC_OFFSET..IPV4_DST_OFFSET + 4]
        && received[ihl..ihl + TCP_HLEN] == sent[IPV4_HLEN..IPV4_HLEN + TCP_HLEN]
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Accumulate 16-bit big-endian words; an odd trailing byte is zero-padded.
fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for w in &mut chunks {
        sum += u16::from_be_bytes([w[0], w[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// IPv4 header checksum. The checksum field is treated as zero.
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum = sum_words(&header[..IPV4_CSUM_OFFSET], 0);
    sum = sum_words(&header[IPV4_CSUM_OFFSET + 2..], sum);
    fold(sum)
}

/// TCP checksum over the IPv4 pseudo-header and `segment`.
/// The checksum field inside `segment` is treated as zero.
///
/// `segment` must be at most `u16::MAX - IPV4_HLEN` bytes long, which
/// [`serialize_tcp_probe`] guarantees.
pub fn tcp_checksum(segment: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = crate::header::IpProtocol::Tcp.number();
    debug_assert!(segment.len() <= u16::MAX as usize - IPV4_HLEN);
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    let mut sum = sum_words(&pseudo, 0);
    sum = sum_words(&segment[..TCP_CSUM_OFFSET], sum);
    sum = sum_words(&segment[TCP_CSUM_OFFSET + 2..], sum);
    fold(sum)
}
