//! Handshake authentication: the arbiter service, the socket-side ZAP
//! options, and the authenticator policies.

pub mod policies;
pub mod service;
pub mod zap;

use std::fmt;

pub use strata::credential::{Credential, Key, KeyPair, UserNameAndPassword};

/// Typed denial raised by an authenticator. The variants map onto the wire
/// status codes the arbiter sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Malformed credentials (400).
    BadRequest(String),
    /// Credentials are not valid (401).
    Unauthorized(String),
    /// Credentials are valid but access is denied (403).
    Forbidden(String),
    /// Anything the arbiter cannot classify (500).
    InternalServerError(String),
}

impl AuthError {
    #[inline]
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::BadRequest(_) => 400,
            AuthError::Unauthorized(_) => 401,
            AuthError::Forbidden(_) => 403,
            AuthError::InternalServerError(_) => 500,
        }
    }

    /// The status text sent on the wire. Only a 400 echoes its message; the
    /// rest use fixed texts so internal detail never leaks to the peer.
    pub fn status_text(&self) -> String {
        match self {
            AuthError::BadRequest(message) => message.clone(),
            AuthError::Unauthorized(_) => "Unauthorized".to_string(),
            AuthError::Forbidden(_) => "Forbidden".to_string(),
            AuthError::InternalServerError(_) => "Internal server error".to_string(),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::BadRequest(message) => write!(f, "Bad request: {}", message),
            AuthError::Unauthorized(message) => write!(f, "Unauthorized: {}", message),
            AuthError::Forbidden(message) => write!(f, "Forbidden: {}", message),
            AuthError::InternalServerError(message) => {
                write!(f, "Internal server error: {}", message)
            }
        }
    }
}

impl std::error::Error for AuthError {}

/// The three-method capability set the arbiter drives. Implementations must
/// be callable from the listener thread.
pub trait Authenticate: Send + Sync {
    /// Errs (typically `Forbidden`) when the peer address is not on an
    /// allow list.
    fn white_listed(&self, address: &str) -> Result<(), AuthError>;

    /// Errs when the peer address is on a deny list.
    fn black_listed(&self, address: &str) -> Result<(), AuthError>;

    /// Validates a credential and returns a human-readable admission note.
    fn authenticate(&self, credential: &Credential) -> Result<String, AuthError>;
}
