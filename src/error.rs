use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::serial::CodecError;

/// Failures of a single transport session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("JRMP handshake with {endpoint} failed: {reason}")]
    Handshake { endpoint: Endpoint, reason: String },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("malformed reply: {0}")]
    Codec(#[from] CodecError),
}

impl SessionError {
    /// Errors worth retrying on a fresh connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Io(_) | SessionError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum RmgError {
    #[error("{0}")]
    Connect(String),
    #[error("no RMI registry on {endpoint}: {reason}")]
    RegistryUnavailable { endpoint: Endpoint, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("payload generation failed: {0}")]
    Gadget(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl RmgError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        RmgError::InvalidInput(message.into())
    }
}

impl From<SessionError> for RmgError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Connect { .. } | SessionError::Handshake { .. } => {
                RmgError::Connect(err.to_string())
            }
            SessionError::Io(err) => RmgError::Io(err),
            SessionError::Timeout(after) => RmgError::Timeout(after),
            SessionError::Codec(err) => RmgError::Protocol(err.to_string()),
        }
    }
}

impl From<CodecError> for RmgError {
    fn from(err: CodecError) -> Self {
        RmgError::Protocol(err.to_string())
    }
}

pub type Result<T, E = RmgError> = std::result::Result<T, E>;
