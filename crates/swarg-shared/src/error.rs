use thiserror::Error;

/// Reasons a session token is rejected.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed session token")]
    Malformed,

    #[error("Invalid session token signature")]
    InvalidSignature,

    #[error("Session token has expired")]
    Expired,

    #[error("Invalid verifying key")]
    InvalidKey,
}
