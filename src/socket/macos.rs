// macOS socket configuration.
//
// Device binding uses IP_BOUND_IF with the interface index. Darwin has no
// socket-level classic filter (BPF lives on /dev/bpf* devices), so filter
// attachment is unsupported.

use std::ffi::CStr;
use std::io;
use std::os::fd::AsRawFd;

use crate::error::ProbeError;
use crate::filter::SockFprog;

use super::{BorrowedSocket, SocketOptions};

// <netinet/in.h>
const IP_BOUND_IF: libc::c_int = 25;

/// `IP_BOUND_IF`-based backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacosSocketOptions;

pub use MacosSocketOptions as PlatformSocketOptions;

impl SocketOptions for MacosSocketOptions {
    fn bind_to_device(
        &self,
        socket: BorrowedSocket<'_>,
        interface: &CStr,
    ) -> Result<(), ProbeError> {
        let bind_error = |source: io::Error| ProbeError::DeviceBind {
            interface: interface.to_string_lossy().into_owned(),
            source,
        };

        let index = unsafe { libc::if_nametoindex(interface.as_ptr()) };
        if index == 0 {
            return Err(bind_error(io::Error::last_os_error()));
        }

        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::IPPROTO_IP,
                IP_BOUND_IF,
                &index as *const libc::c_uint as *const libc::c_void,
                std::mem::size_of::<libc::c_uint>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(bind_error(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn attach_filter(
        &self,
        _socket: BorrowedSocket<'_>,
        _prog: &SockFprog<'_>,
    ) -> Result<(), ProbeError> {
        Err(ProbeError::unsupported("attach_filter"))
    }
}
