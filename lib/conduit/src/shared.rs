//! Error plumbing for the messaging fabric.
//!
//! Non-blocking transport internals use `NetworkResult`, where `Wait` means
//! "not ready, come back later" and `Fatal` kills the connection. Public
//! APIs surface the flat `Error` taxonomy instead.

use std::fmt;
use std::io;

pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    ProtocolMismatch,
    IncorrectKind,
    PayloadTooLarge,
    Malformed,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

/// Fabric-level errors visible to callers.
#[derive(Debug)]
pub enum Error {
    /// An endpoint did not parse, or a setting is out of range.
    InvalidEndpoint(String),
    InvalidConfig(String),
    /// A two-frame send did not complete.
    SendFailed(String),
    ReceiveTimeout,
    QueueFull,
    TransportClosed,
    /// The handshake arbiter refused the connection.
    HandshakeDenied { status_code: u16, status_text: String },
    /// A message failed to decode or had the wrong shape.
    Malformed(String),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidEndpoint(address) => write!(f, "Invalid endpoint: {}", address),
            Error::InvalidConfig(reason) => write!(f, "Invalid configuration: {}", reason),
            Error::SendFailed(reason) => write!(f, "Send failed: {}", reason),
            Error::ReceiveTimeout => write!(f, "Receive timed out"),
            Error::QueueFull => write!(f, "Queue is full"),
            Error::TransportClosed => write!(f, "Transport closed"),
            Error::HandshakeDenied {
                status_code,
                status_text,
            } => write!(f, "Handshake denied ({}): {}", status_code, status_text),
            Error::Malformed(reason) => write!(f, "Malformed message: {}", reason),
            Error::Io(error) => write!(f, "I/O error: {}", error),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::ReceiveTimeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Error::TransportClosed,
            _ => Error::Io(error),
        }
    }
}

impl From<strata::packet::PacketError> for Error {
    fn from(error: strata::packet::PacketError) -> Self {
        Error::Malformed(error.to_string())
    }
}
