use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use swarg_shared::TokenError;
use swarg_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(#[from] TokenError),

    #[error("Not allowed: {0}")]
    Authorization(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(msg) => ServerError::Validation(msg),
            StoreError::Forbidden(msg) => ServerError::Authorization(msg),
            StoreError::NotFound(what) => ServerError::NotFound(what),
            other => ServerError::Storage(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ServerError {
    fn from(rejection: PathRejection) -> Self {
        ServerError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ServerError {
    fn from(rejection: QueryRejection) -> Self {
        ServerError::Validation(rejection.body_text())
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ServerError::Authorization(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text shown to clients. Storage and internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::Storage(_) => "Storage unavailable, try again".to_string(),
            ServerError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match &self {
            ServerError::Storage(detail) | ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
            }
            _ => {}
        }

        let body = serde_json::json!({
            "error": self.public_message(),
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_taxonomy() {
        assert!(matches!(
            ServerError::from(StoreError::Invalid("empty".into())),
            ServerError::Validation(_)
        ));
        assert!(matches!(
            ServerError::from(StoreError::Forbidden("no".into())),
            ServerError::Authorization(_)
        ));
        assert_eq!(
            ServerError::from(StoreError::NotFound("Group")).status(),
            StatusCode::NOT_FOUND
        );
        let storage = ServerError::from(StoreError::Migration("boom".into()));
        assert_eq!(storage.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(storage.public_message(), "Storage unavailable, try again");
    }
}
