use std::time::Duration;

use thiserror::Error;

use crate::network::ErrorCode;

/// Errors surfaced by the node runtime and its request handlers.
#[derive(Debug, Error)]
pub enum Error {
    /// The body of an inbound message did not match the expected shape.
    #[error("malformed message body: {0}")]
    Decode(#[from] serde_json::Error),

    /// No handler is registered for this message type.
    #[error("unsupported message type `{0}`")]
    NotSupported(String),

    /// The request was well-formed but carried a value we refuse to apply.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The node has not received `init` yet, so it has no identity.
    #[error("node identity has not been assigned yet")]
    NotInitialized,

    /// The outbound channel or a pending reply slot was dropped.
    #[error("transport closed")]
    TransportClosed,

    /// An RPC did not complete within its deadline.
    #[error("rpc to {dest} timed out after {after:?}")]
    Timeout { dest: String, after: Duration },

    /// The remote side answered with an `error` body.
    #[error("remote error {code}: {text}")]
    Remote { code: ErrorCode, text: String },

    /// The node is shutting down and the operation was abandoned.
    #[error("node is shutting down")]
    Shutdown,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Protocol error code reported back to the caller for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Decode(_) | Error::InvalidArgument(_) => ErrorCode::MALFORMED_REQUEST,
            Error::NotSupported(_) => ErrorCode::NOT_SUPPORTED,
            Error::NotInitialized | Error::Shutdown => ErrorCode::TEMPORARILY_UNAVAILABLE,
            Error::Timeout { .. } => ErrorCode::TIMEOUT,
            Error::Remote { code, .. } => *code,
            Error::TransportClosed | Error::Io(_) => ErrorCode::CRASH,
        }
    }
}
