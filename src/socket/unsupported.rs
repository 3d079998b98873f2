// Fallback for targets without a device-binding or socket-filter mechanism.

use std::ffi::CStr;

use crate::error::ProbeError;
use crate::filter::SockFprog;

use super::{BorrowedSocket, SocketOptions};

/// Backend that reports every operation as unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedSocketOptions;

pub use UnsupportedSocketOptions as PlatformSocketOptions;

impl SocketOptions for UnsupportedSocketOptions {
    fn bind_to_device(
        &self,
        _socket: BorrowedSocket<'_>,
        _interface: &CStr,
    ) -> Result<(), ProbeError> {
        Err(ProbeError::unsupported("bind_to_device"))
    }

    fn attach_filter(
        &self,
        _socket: BorrowedSocket<'_>,
        _prog: &SockFprog<'_>,
    ) -> Result<(), ProbeError> {
        Err(ProbeError::unsupported("attach_filter"))
    }
}
