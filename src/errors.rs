//! Error types. Dispatch-level errors turn into wire `ERR` responses;
//! startup errors are fatal and abort the process; protocol errors never
//! cross the wire as structured values, they just close the connection.

use thiserror::Error;

/// Errors surfaced to a client as a tagged `ERR` response. Each variant's
/// wire code is fixed by the protocol (§4.6): UNKNOWN=1, TOO_BIG=2, TYPE=3,
/// ARG=4.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("ERR unknown command or wrong number of arguments")]
    Unknown,
    #[error("ERR response too large to serialize")]
    TooBig,
    #[error("ERR wrong type for this key")]
    Type,
    #[error("ERR invalid argument")]
    Arg,
}

impl DispatchError {
    pub(crate) fn code(self) -> i32 {
        match self {
            DispatchError::Unknown => 1,
            DispatchError::TooBig => 2,
            DispatchError::Type => 3,
            DispatchError::Arg => 4,
        }
    }
}

/// Fatal conditions the I/O driver can hit while standing up the listener.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to register the listener with the event loop: {0}")]
    Poll(#[source] std::io::Error),
    #[error("failed to install the SIGINT handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Frame-level parse failures. These never become `ERR` responses; the
/// connection is simply dropped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request body exceeds the maximum frame size")]
    FrameTooBig,
    #[error("malformed argument encoding")]
    MalformedArgs,
    #[error("trailing bytes after the last argument")]
    TrailingBytes,
    #[error("argument count exceeds the configured maximum")]
    TooManyArgs,
}
