//! Error types for the WebSocket server, its protocol coders and the HTTP client.
//!
//! [`Error`] carries the detailed failure; [`ErrorKind`] is the closed set of
//! categories exposed to callbacks, and the `close_code`/`http_status` helpers
//! map an error onto what goes back on the wire.

use thiserror::Error;

use crate::admission::Admission;
use crate::http::StatusCode;
use crate::message::CloseCode;
use crate::net::{SocketError, SocketErrorKind};

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of error categories reported to user callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Creating, binding or listening on the server socket failed.
    BindFailed,
    /// Accepting a connection failed.
    AcceptFailed,
    /// The upgrade request was malformed or unsupported.
    InvalidHandshake,
    /// The upgrade request exceeded the request size limit.
    RequestTooLarge,
    /// The client was refused by the security policy.
    BlockedClient,
    /// The admission controller refused the connection.
    AdmissionRefused,
    /// A frame violated RFC 6455.
    FrameProtocolError,
    /// A frame or message exceeded the payload limit.
    PayloadTooLarge,
    /// The peer closed the connection.
    PeerClosed,
    /// Any other I/O failure, including timeouts.
    IoFailure,
    /// A caller supplied an invalid argument or called a setter at the wrong time.
    InvalidArgument,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::BindFailed => "BindFailed",
            ErrorKind::AcceptFailed => "AcceptFailed",
            ErrorKind::InvalidHandshake => "InvalidHandshake",
            ErrorKind::RequestTooLarge => "RequestTooLarge",
            ErrorKind::BlockedClient => "BlockedClient",
            ErrorKind::AdmissionRefused => "AdmissionRefused",
            ErrorKind::FrameProtocolError => "FrameProtocolError",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::PeerClosed => "PeerClosed",
            ErrorKind::IoFailure => "IOFailure",
            ErrorKind::InvalidArgument => "InvalidArgument",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while serving or speaking WebSocket/HTTP.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Socket facade failure.
    #[error(transparent)]
    Socket(#[from] SocketError),

    /// Invalid argument or configuration.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Upgrade request exceeds the configured maximum.
    #[error("Request too large: {size} bytes (max: {max})")]
    RequestTooLarge {
        /// Observed request size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Client refused by the user-agent block list.
    #[error("Blocked client: {0}")]
    BlockedClient(String),

    /// Origin header did not match the allowed origins.
    #[error("Origin not allowed: {origin}")]
    OriginNotAllowed {
        /// The rejected origin.
        origin: String,
    },

    /// Header value would allow response splitting.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Connection refused by the admission controller.
    #[error("Admission refused: {0}")]
    AdmissionRefused(Admission),

    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text frame.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Declared payload length does not fit in memory on this platform.
    #[error("Payload too large for platform: {size} bytes (max: {max})")]
    PayloadTooLargeForPlatform {
        /// Declared length.
        size: u64,
        /// Platform maximum.
        max: u64,
    },

    /// Fragmented data messages are not reassembled.
    #[error("Fragmented messages are not supported")]
    FragmentedMessage,

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// A read or handshake did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Malformed HTTP response received by the client.
    #[error("Invalid HTTP response: {0}")]
    Http(String),

    /// I/O error occurred.
    #[error("I/O error: {message}")]
    Io {
        /// Rendered error.
        message: String,
        /// Raw OS error code, when one exists.
        code: Option<i32>,
    },
}

impl Error {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Socket(err) => match err.kind() {
                SocketErrorKind::CreateFailed
                | SocketErrorKind::BindFailed
                | SocketErrorKind::ListenFailed => ErrorKind::BindFailed,
                SocketErrorKind::AcceptFailed => ErrorKind::AcceptFailed,
                SocketErrorKind::ConnectionClosed => ErrorKind::PeerClosed,
                SocketErrorKind::InvalidArgument => ErrorKind::InvalidArgument,
                SocketErrorKind::ConnectFailed
                | SocketErrorKind::SendFailed
                | SocketErrorKind::RecvFailed
                | SocketErrorKind::WouldBlock => ErrorKind::IoFailure,
            },
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::InvalidHandshake(_) | Error::InvalidHeaderValue { .. } => {
                ErrorKind::InvalidHandshake
            }
            Error::RequestTooLarge { .. } => ErrorKind::RequestTooLarge,
            Error::BlockedClient(_) | Error::OriginNotAllowed { .. } => ErrorKind::BlockedClient,
            Error::AdmissionRefused(_) => ErrorKind::AdmissionRefused,
            Error::InvalidFrame(_)
            | Error::ProtocolViolation(_)
            | Error::InvalidUtf8
            | Error::InvalidCloseCode(_)
            | Error::ReservedOpcode(_)
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_)
            | Error::UnmaskedClientFrame
            | Error::ReservedBitsSet
            | Error::IncompleteFrame { .. }
            | Error::InvalidOpcode(_) => ErrorKind::FrameProtocolError,
            Error::FrameTooLarge { .. }
            | Error::PayloadTooLargeForPlatform { .. }
            | Error::FragmentedMessage => ErrorKind::PayloadTooLarge,
            Error::ConnectionClosed(_) => ErrorKind::PeerClosed,
            Error::Timeout(_) | Error::Http(_) | Error::Io { .. } => ErrorKind::IoFailure,
        }
    }

    /// Raw OS error code, when the failure came from the operating system.
    #[must_use]
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Error::Socket(err) => err.os_code(),
            Error::Io { code, .. } => *code,
            _ => None,
        }
    }

    /// Close code the server sends when this error ends an open connection.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self.kind() {
            ErrorKind::PayloadTooLarge => Some(CloseCode::MessageTooBig),
            ErrorKind::FrameProtocolError if matches!(self, Error::InvalidUtf8) => {
                Some(CloseCode::InvalidPayload)
            }
            ErrorKind::FrameProtocolError => Some(CloseCode::ProtocolError),
            _ => None,
        }
    }

    /// HTTP status the server answers with when this error ends a handshake.
    #[must_use]
    pub fn http_status(&self) -> Option<StatusCode> {
        match self {
            Error::InvalidHandshake(_) | Error::InvalidHeaderValue { .. } => {
                Some(StatusCode::BadRequest)
            }
            Error::BlockedClient(_) => Some(StatusCode::BadRequest),
            Error::OriginNotAllowed { .. } => Some(StatusCode::Forbidden),
            Error::RequestTooLarge { .. } => Some(StatusCode::PayloadTooLarge),
            Error::AdmissionRefused(_) => Some(StatusCode::TooManyRequests),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        match err.kind() {
            IoKind::ConnectionReset
            | IoKind::ConnectionAborted
            | IoKind::BrokenPipe
            | IoKind::UnexpectedEof => Error::ConnectionClosed(None),
            IoKind::TimedOut | IoKind::WouldBlock => Error::Timeout(err.to_string()),
            _ => Error::Io {
                message: err.to_string(),
                code: err.raw_os_error(),
            },
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}
