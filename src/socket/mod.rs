// Platform-abstracted raw socket configuration.
//
// On Linux: SO_BINDTODEVICE and SO_ATTACH_FILTER.
// On macOS: IP_BOUND_IF for device binding; no socket-level classic filter.
// Elsewhere: every operation reports UnsupportedPlatform.
//
// Each platform module exports:
//   - a type implementing `SocketOptions`
//   - `PlatformSocketOptions`, an alias for that type
//
// Sockets are passed as `BorrowedSocket`: a borrowed fd on unix, a borrowed
// SOCKET on Windows, and an opaque borrow of a std socket everywhere else.

use std::ffi::CString;
use std::io;
#[cfg(not(any(unix, windows)))]
use std::marker::PhantomData;

use crate::error::ProbeError;
use crate::filter::{FilterProgram, SockFprog};

#[cfg(unix)]
pub use std::os::fd::{AsFd as AsSocket, BorrowedFd as BorrowedSocket};
#[cfg(windows)]
pub use std::os::windows::io::{AsSocket, BorrowedSocket};

/// Borrow of a socket on targets with no OS-level socket handle type.
#[cfg(not(any(unix, windows)))]
#[derive(Debug, Clone, Copy)]
pub struct BorrowedSocket<'a> {
    _socket: PhantomData<&'a ()>,
}

/// Sockets that can lend a [`BorrowedSocket`].
#[cfg(not(any(unix, windows)))]
pub trait AsSocket {
    fn as_socket(&self) -> BorrowedSocket<'_>;
}

#[cfg(not(any(unix, windows)))]
macro_rules! impl_as_socket {
    ($($ty:ty),*) => {
        $(impl AsSocket for $ty {
            fn as_socket(&self) -> BorrowedSocket<'_> {
                BorrowedSocket { _socket: PhantomData }
            }
        })*
    };
}

#[cfg(not(any(unix, windows)))]
impl_as_socket!(std::net::UdpSocket, std::net::TcpStream, std::net::TcpListener);

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::*;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod unsupported;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub use unsupported::*;

/// Interface names must leave room for the trailing NUL in `ifr_name`.
const IFNAMSIZ: usize = 16;

/// Kernel-facing socket configuration calls.
///
/// Implementations issue exactly one OS request per call and perform no
/// validation of their own; argument checks happen in [`bind_to_device_with`]
/// and [`attach_filter_with`].
pub trait SocketOptions {
    /// Restrict `socket` to the device named `interface`.
    fn bind_to_device(
        &self,
        socket: BorrowedSocket<'_>,
        interface: &std::ffi::CStr,
    ) -> Result<(), ProbeError>;

    /// Install the classic BPF program described by `prog` on `socket`.
    fn attach_filter(
        &self,
        socket: BorrowedSocket<'_>,
        prog: &SockFprog<'_>,
    ) -> Result<(), ProbeError>;
}

/// Bind `socket` to `interface` using the platform backend.
pub fn bind_to_device<S: AsSocket + ?Sized>(
    socket: &S,
    interface: &str,
) -> Result<(), ProbeError> {
    bind_to_device_with(&PlatformSocketOptions, socket, interface)
}

/// Attach `program` to `socket` using the platform backend.
pub fn attach_filter<S: AsSocket + ?Sized>(
    socket: &S,
    program: &FilterProgram,
) -> Result<(), ProbeError> {
    attach_filter_with(&PlatformSocketOptions, socket, program)
}

/// Bind `socket` to `interface` through `opts`.
///
/// The name is checked locally first: an empty, over-long, or NUL-containing
/// name fails without reaching the kernel, carrying `EINVAL` on unix and
/// `ErrorKind::InvalidInput` elsewhere. Re-binding to the
/// same device is accepted by the kernel, and binding to another device
/// re-targets the socket.
pub fn bind_to_device_with<O, S>(opts: &O, socket: &S, interface: &str) -> Result<(), ProbeError>
where
    O: SocketOptions + ?Sized,
    S: AsSocket + ?Sized,
{
    let name = interface_name(interface)?;
    opts.bind_to_device(borrow(socket), &name)?;
    log::debug!("socket bound to device {interface}");
    Ok(())
}

/// Attach `program` to `socket` through `opts`.
///
/// The kernel descriptor borrows `program` for the duration of the single
/// `attach_filter` call. Programs that do not fit a 16-bit length fail with
/// [`ProbeError::FilterTooLarge`] before `opts` is called.
pub fn attach_filter_with<O, S>(
    opts: &O,
    socket: &S,
    program: &FilterProgram,
) -> Result<(), ProbeError>
where
    O: SocketOptions + ?Sized,
    S: AsSocket + ?Sized,
{
    let fprog = program.descriptor()?;
    opts.attach_filter(borrow(socket), &fprog)?;
    log::debug!("attached {}-instruction socket filter", fprog.len());
    Ok(())
}

fn interface_name(interface: &str) -> Result<CString, ProbeError> {
    let invalid = || ProbeError::DeviceBind {
        interface: interface.to_string(),
        source: invalid_name_error(),
    };
    if interface.is_empty() || interface.len() >= IFNAMSIZ {
        return Err(invalid());
    }
    CString::new(interface).map_err(|_| invalid())
}

#[cfg(unix)]
fn invalid_name_error() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

#[cfg(not(unix))]
fn invalid_name_error() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "invalid interface name")
}

#[cfg(unix)]
fn borrow<S: AsSocket + ?Sized>(socket: &S) -> BorrowedSocket<'_> {
    socket.as_fd()
}

#[cfg(not(unix))]
fn borrow<S: AsSocket + ?Sized>(socket: &S) -> BorrowedSocket<'_> {
    socket.as_socket()
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::ffi::CStr;
    use std::net::UdpSocket;

    use super::*;
    use crate::filter::{BPF_RET, BPF_K, MAX_PROGRAM_LEN, insn};

    /// Records every call that would reach the kernel.
    #[derive(Default)]
    struct CountingOptions {
        binds: RefCell<Vec<String>>,
        attaches: Cell<usize>,
        last_len: Cell<u16>,
        attach_errno: Option<i32>,
    }

    impl SocketOptions for CountingOptions {
        fn bind_to_device(
            &self,
            _socket: BorrowedSocket<'_>,
            interface: &CStr,
        ) -> Result<(), ProbeError> {
            self.binds
                .borrow_mut()
                .push(interface.to_string_lossy().into_owned());
            Ok(())
        }

        fn attach_filter(
            &self,
            _socket: BorrowedSocket<'_>,
            prog: &SockFprog<'_>,
        ) -> Result<(), ProbeError> {
            self.attaches.set(self.attaches.get() + 1);
            self.last_len.set(prog.len());
            match self.attach_errno {
                Some(errno) => Err(ProbeError::FilterAttach(io::Error::from_raw_os_error(errno))),
                None => Ok(()),
            }
        }
    }

    /// Arbitrary errno handed back by the rejecting double.
    const REJECT_CODE: i32 = 22;

    fn socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").expect("bind udp socket")
    }

    #[test]
    fn ut_oversized_program_never_reaches_kernel() {
        let opts = CountingOptions::default();
        let prog =
            FilterProgram::new(vec![insn(BPF_RET | BPF_K, 0, 0, 0); MAX_PROGRAM_LEN + 1]).unwrap();
        let err = attach_filter_with(&opts, &socket(), &prog).unwrap_err();
        assert!(matches!(err, ProbeError::FilterTooLarge { .. }));
        assert_eq!(opts.attaches.get(), 0);
    }

    #[test]
    fn ut_single_instruction_program_issues_one_call() {
        let opts = CountingOptions::default();
        attach_filter_with(&opts, &socket(), &FilterProgram::accept_all()).unwrap();
        assert_eq!(opts.attaches.get(), 1);
        assert_eq!(opts.last_len.get(), 1);
    }

    #[test]
    fn ut_kernel_rejection_carries_code() {
        let opts = CountingOptions {
            attach_errno: Some(REJECT_CODE),
            ..Default::default()
        };
        let err = attach_filter_with(&opts, &socket(), &FilterProgram::drop_all()).unwrap_err();
        assert!(matches!(err, ProbeError::FilterAttach(_)));
        assert_eq!(err.os_code(), Some(REJECT_CODE));
        assert_eq!(opts.attaches.get(), 1);
    }

    #[test]
    fn ut_bind_passes_name_through() {
        let opts = CountingOptions::default();
        let sock = socket();
        bind_to_device_with(&opts, &sock, "lo").unwrap();
        bind_to_device_with(&opts, &sock, "lo").unwrap();
        bind_to_device_with(&opts, &sock, "eth0").unwrap();
        assert_eq!(*opts.binds.borrow(), vec!["lo", "lo", "eth0"]);
    }

    #[test]
    fn ut_bind_rejects_bad_names_locally() {
        let opts = CountingOptions::default();
        let sock = socket();
        for name in ["", "a-very-long-ifname", "eth\00"] {
            let err = bind_to_device_with(&opts, &sock, name).unwrap_err();
            match &err {
                ProbeError::DeviceBind { interface, source } => {
                    assert_eq!(interface, name);
                    assert_eq!(source.kind(), io::ErrorKind::InvalidInput, "{name:?}");
                }
                other => panic!("expected DeviceBind for {name:?}, got {other:?}"),
            }
            #[cfg(unix)]
            assert_eq!(err.os_code(), Some(libc::EINVAL));
        }
        assert!(opts.binds.borrow().is_empty());
    }

    #[test]
    fn ut_invalid_name_error_is_invalid_input() {
        assert_eq!(invalid_name_error().kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn ut_interface_name_limit() {
        assert!(interface_name("abcdefghijklmno").is_ok()); // 15 chars
        assert!(interface_name("abcdefghijklmnop").is_err()); // 16 chars
    }
}
