//! ==============================================================================
//! error.rs - error taxonomy
//! ==============================================================================
//!
//! purpose:
//!     one error type per boundary so callers always get a typed outcome:
//!     - ValidationError: caught locally, never sent over the wire
//!     - GatewayError: transport / status / payload failures from the backend
//!     - AuthError: provider-reported failures, message passed through verbatim
//!
//! every failure is terminal for the current operation (no retry, no backoff).
//! the web layer (server.rs) turns these into inline json error messages.
//!
//! ==============================================================================

use thiserror::Error;

/// local, pre-network rejection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("content must not be empty")]
    EmptyContent,

    #[error("title must not be empty")]
    EmptyTitle,

    #[error("nickname must not be empty")]
    EmptyGuestName,

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("passwords do not match")]
    PasswordMismatch,

    #[error("sign in or pick a nickname first")]
    IdentityRequired,

    #[error("unknown board: {0}")]
    UnknownBoard(String),

    #[error("unsupported time range: {0} hours")]
    UnsupportedRange(u32),
}

/// failure talking to the remote tabular store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("request to backend failed: {0}")]
    TransportFailure(String),

    #[error("backend returned {status}: {body}")]
    NonSuccessStatus { status: u16, body: String },

    #[error("unexpected payload from backend: {0}")]
    MalformedPayload(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::MalformedPayload(e.to_string())
        } else {
            GatewayError::TransportFailure(e.to_string())
        }
    }
}

/// failure reported by an auth provider or the member directory
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// provider rejected the call; message is shown as-is
    #[error("{0}")]
    Rejected(String),

    #[error("auth request failed: {0}")]
    TransportFailure(String),

    #[error("no account for that email")]
    UnknownEmail,

    #[error("wrong password")]
    WrongPassword,

    #[error("email is already registered")]
    EmailTaken,
}

/// outcome of a write through the session layer or the content store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// bulletin-board operation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BulletinError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("post {0} not found")]
    PostNotFound(u64),
}
