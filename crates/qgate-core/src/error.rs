//! Shared error type across qgate crates.

use thiserror::Error;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed request.
    BadRequest,
    /// Caller identity missing or not verifiable.
    AuthFailed,
    /// Rejected by the permission engine.
    PermissionDenied,
    /// Queue/KV substrate unreachable or misbehaving.
    Transport,
    /// No reply within the declared timeout.
    Timeout,
    /// The remote handler ran and reported a failure.
    HandlerError,
    /// Unsupported protocol or config version.
    UnsupportedVersion,
    /// Internal server error.
    Internal,
}

impl ClientCode {
    /// String representation used in JSON responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::AuthFailed => "AUTH_FAILED",
            ClientCode::PermissionDenied => "PERMISSION_DENIED",
            ClientCode::Transport => "TRANSPORT",
            ClientCode::Timeout => "TIMEOUT",
            ClientCode::HandlerError => "HANDLER_ERROR",
            ClientCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, QgateError>;

/// Unified error type used by core and gateway.
///
/// `Transport` means the request was never submitted. `Timeout` means the
/// outcome is unknown: a worker may still be executing it.
#[derive(Debug, Error)]
pub enum QgateError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("auth failed")]
    AuthFailed,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("timed out waiting for reply")]
    Timeout,
    #[error("handler error: {0}")]
    Handler(String),
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl QgateError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            QgateError::BadRequest(_) => ClientCode::BadRequest,
            QgateError::AuthFailed => ClientCode::AuthFailed,
            QgateError::PermissionDenied(_) => ClientCode::PermissionDenied,
            QgateError::Transport(_) => ClientCode::Transport,
            QgateError::Timeout => ClientCode::Timeout,
            QgateError::Handler(_) => ClientCode::HandlerError,
            QgateError::UnsupportedVersion => ClientCode::UnsupportedVersion,
            QgateError::Internal(_) => ClientCode::Internal,
        }
    }
}
