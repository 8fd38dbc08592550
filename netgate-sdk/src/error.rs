//! Failure taxonomy for network operations
//!
//! These never reach plugin code: operations absorb them into their
//! sentinel return values and only log them.

use crate::memory::EncodingError;
use netgate_api::{RequestError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    /// The gate denied the capability
    #[error("Capability '{0}' not granted")]
    PermissionDenied(&'static str),

    /// No transport is wired for this deployment
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The transport ran and failed, or answered with garbage
    #[error("Transport failed: {0}")]
    TransportFailure(String),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Request(#[from] RequestError),
}

impl NetError {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "permission_denied",
            Self::TransportUnavailable(_) => "transport_unavailable",
            Self::TransportFailure(_) => "transport_failure",
            Self::Encoding(_) | Self::Request(_) => "encoding_failure",
        }
    }
}

impl From<TransportError> for NetError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable(reason) => Self::TransportUnavailable(reason),
            other => Self::TransportFailure(other.to_string()),
        }
    }
}
