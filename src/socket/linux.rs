// Linux socket configuration: SO_BINDTODEVICE and SO_ATTACH_FILTER.

use std::ffi::CStr;
use std::io;
use std::os::fd::AsRawFd;

use crate::error::ProbeError;
use crate::filter::{SockFilter, SockFprog};

use super::{BorrowedSocket, SocketOptions};

// Our descriptor types must be layout-identical to the kernel's.
const _: () =
    assert!(std::mem::size_of::<SockFilter>() == std::mem::size_of::<libc::sock_filter>());
const _: () =
    assert!(std::mem::size_of::<SockFprog<'static>>() == std::mem::size_of::<libc::sock_fprog>());
const _: () =
    assert!(std::mem::align_of::<SockFprog<'static>>() == std::mem::align_of::<libc::sock_fprog>());

/// `setsockopt`-based backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxSocketOptions;

pub use LinuxSocketOptions as PlatformSocketOptions;

impl SocketOptions for LinuxSocketOptions {
    fn bind_to_device(
        &self,
        socket: BorrowedSocket<'_>,
        interface: &CStr,
    ) -> Result<(), ProbeError> {
        let name = interface.to_bytes();
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_BINDTODEVICE,
                name.as_ptr() as *const libc::c_void,
                name.len() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(ProbeError::DeviceBind {
                interface: interface.to_string_lossy().into_owned(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn attach_filter(
        &self,
        socket: BorrowedSocket<'_>,
        prog: &SockFprog<'_>,
    ) -> Result<(), ProbeError> {
        // SAFETY: `prog` borrows its FilterProgram, so `prog.filter` points at
        // `prog.len` live instructions until this call returns. The kernel
        // copies the program before setsockopt returns.
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_ATTACH_FILTER,
                prog as *const SockFprog<'_> as *const libc::c_void,
                std::mem::size_of::<SockFprog<'_>>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(ProbeError::FilterAttach(io::Error::last_os_error()));
        }
        Ok(())
    }
}
