//! Loopback self-test: configure a raw socket, send one probe, see it arrive.
//!
//! Exercises the full setup path a probing agent goes through: device
//! binding, filter attachment, header construction and serialization.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;

use crate::error::ProbeError;
use crate::filter::{
    ACCEPT_SNAPLEN, BPF_ABS, BPF_B, BPF_H, BPF_IND, BPF_JEQ, BPF_JMP, BPF_JSET, BPF_K, BPF_LD,
    BPF_LDX, BPF_MSH, BPF_RET, FilterProgram, insn,
};
use crate::header::{Ipv4HeaderFields, SerializeOptions};

/// Settings for one self-test run.
#[derive(Debug, Clone)]
pub struct SelftestConfig {
    pub interface: String,
    pub source: Ipv4Addr,
    pub target: Ipv4Addr,
    pub port: u16,
    pub tos: u8,
    pub timeout: Duration,
    /// Program to attach instead of [`probe_port_filter`].
    pub filter: Option<FilterProgram>,
}

/// Outcome of a self-test run.
#[derive(Debug, Clone, Serialize)]
pub struct SelftestReport {
    pub interface: String,
    pub target: Ipv4Addr,
    pub port: u16,
    pub filter_len: usize,
    pub header: Ipv4HeaderFields,
    pub options: SerializeOptions,
    pub probe_len: usize,
    pub observed: bool,
    /// Packets that passed the filter but were not the probe.
    pub other_packets: u32,
    pub elapsed_us: u64,
}

/// Program for a raw IPv4 socket (data starts at the IP header) accepting
/// unfragmented TCP segments whose destination port is `port`.
///
/// ```text
///   [0] ldb  [9]                ; IP protocol
///   [1] jeq  #6      jt=0 jf=6  ; TCP? else drop
///   [2] ldh  [6]                ; flags + fragment offset
///   [3] jset #0x1fff jt=4 jf=0  ; fragment? drop
///   [4] ldxb 4*([0]&0xf)        ; X = IP header length
///   [5] ldh  [x+2]              ; TCP destination port
///   [6] jeq  #port   jt=0 jf=1
///   [7] ret  #65535
///   [8] ret  #0
/// ```
pub fn probe_port_filter(port: u16) -> FilterProgram {
    FilterProgram::from_array([
        insn(BPF_LD | BPF_B | BPF_ABS, 0, 0, 9),
        insn(BPF_JMP | BPF_JEQ | BPF_K, 0, 6, 6),
        insn(BPF_LD | BPF_H | BPF_ABS, 0, 0, 6),
        insn(BPF_JMP | BPF_JSET | BPF_K, 4, 0, 0x1FFF),
        insn(BPF_LDX | BPF_B | BPF_MSH, 0, 0, 0),
        insn(BPF_LD | BPF_H | BPF_IND, 0, 0, 2),
        insn(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, port as u32),
        insn(BPF_RET | BPF_K, 0, 0, ACCEPT_SNAPLEN),
        insn(BPF_RET | BPF_K, 0, 0, 0),
    ])
}

#[cfg(target_os = "linux")]
pub use linux::run;

#[cfg(not(target_os = "linux"))]
pub fn run(_config: &SelftestConfig) -> Result<SelftestReport, ProbeError> {
    Err(ProbeError::unsupported("selftest"))
}

#[cfg(target_os = "linux")]
mod linux {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::time::Instant;

    use super::*;
    use crate::header::{build_ipv4_header, serialization_options};
    use crate::packet::{TCP_HLEN, TcpProbe, is_same_probe, serialize_tcp_probe};
    use crate::socket::{attach_filter, bind_to_device};

    const RECV_BUF_LEN: usize = 65_536;

    /// Run the self-test. Requires CAP_NET_RAW.
    pub fn run(config: &SelftestConfig) -> Result<SelftestReport, ProbeError> {
        let started = Instant::now();

        // 1. Receiving socket: bind, then filter.
        let recv = raw_socket(libc::IPPROTO_TCP)?;
        bind_to_device(&recv, &config.interface)?;

        let program = config
            .filter
            .clone()
            .unwrap_or_else(|| probe_port_filter(config.port));
        attach_filter(&recv, &program)?;

        // 2. Build the probe.
        let src_port = 32_768 + (std::process::id() % 28_000) as u16;
        let seq = std::process::id().rotate_left(16) ^ 0x5eed_0000;
        let tcp = TcpProbe::syn(src_port, config.port, seq);
        let header = build_ipv4_header(config.tos, TCP_HLEN as u16, config.source, config.target);
        let options = serialization_options();
        let probe = serialize_tcp_probe(&header, &tcp, &[], options)?;

        // 3. Send it through an IP_HDRINCL socket.
        let send = raw_socket(libc::IPPROTO_RAW)?;
        send_to(&send, &probe, config.target)?;
        log::debug!(
            "sent {}-byte probe {}:{} -> {}:{}",
            probe.len(),
            config.source,
            src_port,
            config.target,
            config.port
        );

        // 4. Wait for it to come back through the filtered socket.
        let (observed, other_packets) = wait_for_probe(&recv, &probe, config.timeout)?;

        Ok(SelftestReport {
            interface: config.interface.clone(),
            target: config.target,
            port: config.port,
            filter_len: program.len(),
            header,
            options,
            probe_len: probe.len(),
            observed,
            other_packets,
            elapsed_us: started.elapsed().as_micros() as u64,
        })
    }

    fn raw_socket(protocol: libc::c_int) -> Result<OwnedFd, ProbeError> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, protocol) };
        if fd < 0 {
            return Err(ProbeError::Socket {
                context: format!("socket(AF_INET, SOCK_RAW, {protocol}) (requires CAP_NET_RAW)"),
                source: io::Error::last_os_error(),
            });
        }
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// SO_RCVTIMEO value for `timeout`. A zero timeval means "block forever",
    /// so anything shorter than a microsecond is rounded up to one.
    pub(super) fn recv_timeval(timeout: Duration) -> libc::timeval {
        let timeout = timeout.max(Duration::from_micros(1));
        libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        }
    }

    fn set_recv_timeout(fd: &OwnedFd, timeout: Duration) -> Result<(), ProbeError> {
        let tv = recv_timeval(timeout);
        let ret = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(ProbeError::Socket {
                context: "SO_RCVTIMEO".to_string(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn send_to(fd: &OwnedFd, packet: &[u8], target: Ipv4Addr) -> Result<(), ProbeError> {
        let dst = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes(target.octets()),
            },
            sin_zero: [0; 8],
        };
        let ret = unsafe {
            libc::sendto(
                fd.as_raw_fd(),
                packet.as_ptr() as *const libc::c_void,
                packet.len(),
                0,
                &dst as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(ProbeError::Socket {
                context: format!("sendto({target})"),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Read until the probe shows up or `timeout` elapses.
    ///
    /// The receive timeout is re-armed with the time left before every read,
    /// so the wait never outlasts `timeout` by more than one syscall.
    fn wait_for_probe(
        fd: &OwnedFd,
        probe: &[u8],
        timeout: Duration,
    ) -> Result<(bool, u32), ProbeError> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; RECV_BUF_LEN];
        let mut others = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            set_recv_timeout(fd, remaining)?;
            let n = unsafe {
                libc::recv(
                    fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EAGAIN) => break,
                    Some(libc::EINTR) => continue,
                    _ => {
                        return Err(ProbeError::Socket {
                            context: "recv".to_string(),
                            source: err,
                        });
                    }
                }
            }
            if is_same_probe(&buf[..n as usize], probe) {
                return Ok((true, others));
            }
            others += 1;
        }

        Ok((false, others))
    }
}
