//! # swarg-shared
//!
//! Types shared by the Swarg Social store and server: identifier newtypes,
//! delivery rooms, notification kinds, media references, and the signed
//! session token the server validates on every connection.

pub mod constants;
pub mod error;
pub mod session;
pub mod types;

pub use error::TokenError;
pub use session::{issue_session_token, SessionClaims, SessionVerifier};
pub use types::*;
