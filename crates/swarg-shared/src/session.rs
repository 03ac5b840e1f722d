//! Signed session tokens.
//!
//! The account service signs `SessionClaims` with its Ed25519 key and hands
//! the encoded token to the client. The server only holds the verifying key
//! and checks signature and expiry on every REST call and WebSocket upgrade.
//!
//! Wire form: `base64url(claims_json) "." base64url(signature)`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// The authenticated user.
    pub sub: UserId,
    /// Display name at the time the token was issued.
    pub name: String,
    /// Expiry instant.
    pub exp: DateTime<Utc>,
}

/// Sign `claims` and encode them as a bearer token.
pub fn issue_session_token(claims: &SessionClaims, signing_key: &SigningKey) -> String {
    // Serializing a struct of strings and a timestamp cannot fail.
    let payload = serde_json::to_vec(claims).unwrap_or_default();
    let signature = signing_key.sign(&payload);

    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    )
}

/// Validates tokens against the issuer's public key.
#[derive(Clone)]
pub struct SessionVerifier {
    key: VerifyingKey,
}

impl SessionVerifier {
    /// Small-order ("weak") keys are refused; the all-zero placeholder key
    /// is one of them.
    pub fn new(pubkey: &[u8; 32]) -> Result<Self, TokenError> {
        let key = VerifyingKey::from_bytes(pubkey).map_err(|_| TokenError::InvalidKey)?;
        if key.is_weak() {
            return Err(TokenError::InvalidKey);
        }
        Ok(Self { key })
    }

    pub fn from_verifying_key(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Decode and check a token. Signature is checked before expiry so an
    /// expired forgery reports `InvalidSignature`.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let (payload_b64, sig_b64) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::Malformed)?;

        let signature =
            Signature::from_slice(&sig_bytes).map_err(|_| TokenError::InvalidSignature)?;
        self.key
            .verify_strict(&payload, &signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: SessionClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        if now >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
