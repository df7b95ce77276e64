//! Error type shared by every layer of the client.

use thiserror::Error;
use tonic::{Code, Status};

/// Errors that can occur while talking to the controller
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed endpoint/token; raised before any network attempt
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Handshake or connect failure
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// The controller answered a unary call with a non-success status
    #[error("remote call failed: {}: {}", .0.code(), .0.message())]
    Remote(Status),
    /// A subscription ended with an error
    #[error("stream failed: {}: {}", .0.code(), .0.message())]
    Stream(Status),
    /// A response carried a value that could not be decoded
    #[error("malformed response: {0}")]
    Decode(String),
    /// The call was abandoned before it produced a result
    #[error("call dropped before completion")]
    Dropped,
    /// The process-wide entrypoint was set up twice
    #[error("cloud client already initialized")]
    AlreadyInitialized,
}

impl Error {
    /// Status code of a remote or stream failure.
    pub fn code(&self) -> Option<Code> {
        match self {
            Error::Remote(status) | Error::Stream(status) => Some(status.code()),
            _ => None,
        }
    }

    /// Returns true if the controller reported that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Remote(status) if status.code() == Code::NotFound)
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Remote(status)
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;
