//! Bearer-token authentication for REST handlers.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use swarg_shared::{TokenError, UserId};

use crate::error::ServerError;
use crate::state::{with_db, AppState};

/// The authenticated caller. Extracting it also makes sure the caller has a
/// profile row, so first contact with the server needs no separate signup.
/// A deleted account is refused with 403 instead of being recreated.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: UserId,
    pub name: String,
}

/// `Authorization: Bearer <token>` or nothing.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(TokenError::Malformed)?;
        let claims = state.verifier.verify(token)?;

        let (id, name) = (claims.sub, claims.name.clone());
        with_db(&state.db, move |db| db.ensure_user(id, &name)).await?;

        Ok(AuthUser {
            id: claims.sub,
            name: claims.name,
        })
    }
}
