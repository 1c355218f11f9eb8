use std::fmt;
use std::io;

use adtlink_frame::FrameError;
use adtlink_mux::MuxError;
use adtlink_port::PortError;
use adtlink_pump::AdtError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => USAGE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn port_error(context: &str, err: PortError) -> CliError {
    match err {
        PortError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    let code = match &err {
        FrameError::InvalidCapacity { .. } | FrameError::InvalidArgument(_) => USAGE,
        FrameError::PayloadTooLarge { .. }
        | FrameError::InvalidMagic(_)
        | FrameError::UnknownType(_)
        | FrameError::Truncated { .. }
        | FrameError::Misaligned { .. } => DATA_INVALID,
        FrameError::WouldBlock => FAILURE,
        FrameError::OutOfMemory(_) | FrameError::Corruption { .. } => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn adt_error(context: &str, err: AdtError) -> CliError {
    match err {
        AdtError::Port(err) => port_error(context, err),
        AdtError::Frame(err) => frame_error(context, err),
        AdtError::Spawn { source, .. } => io_error(context, source),
        AdtError::InvalidArgument(_)
        | AdtError::InvalidConfig(_)
        | AdtError::AlreadyMonitored(_)
        | AdtError::NotMonitored(_) => CliError::new(USAGE, format!("{context}: {err}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Adt(err) => adt_error(context, err),
        MuxError::Frame(err) => frame_error(context, err),
        MuxError::InvalidClient(_) | MuxError::AlreadyRegistered(_) | MuxError::NotRegistered(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        MuxError::Closed(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}
