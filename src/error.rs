use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("cannot bind socket to device {interface}: {source}")]
    DeviceBind {
        interface: String,
        #[source]
        source: io::Error,
    },
    #[error("filter program has {len} instructions, kernel limit is {max}")]
    FilterTooLarge { len: usize, max: usize },
    #[error("filter program is empty")]
    FilterEmpty,
    #[error("SO_ATTACH_FILTER failed: {0}")]
    FilterAttach(#[source] io::Error),
    #[error("packet of {len} bytes exceeds the IPv4 limit of {max}")]
    PacketTooLarge { len: usize, max: usize },
    #[error("filter bytecode parse error at line {line}: {detail}")]
    FilterParse { line: usize, detail: String },
    #[error("{operation} is not supported on {platform}")]
    UnsupportedPlatform {
        operation: &'static str,
        platform: &'static str,
    },
    #[error("{context}: {source}")]
    Socket {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[source] io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProbeError {
    /// Underlying OS error code, when the failure came from the kernel.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::DeviceBind { source, .. } | Self::Socket { source, .. } => source.raw_os_error(),
            Self::FilterAttach(source) | Self::Io(source) => source.raw_os_error(),
            _ => None,
        }
    }

    /// `UnsupportedPlatform` for `operation` on the current target.
    pub fn unsupported(operation: &'static str) -> Self {
        Self::UnsupportedPlatform {
            operation,
            platform: std::env::consts::OS,
        }
    }
}
