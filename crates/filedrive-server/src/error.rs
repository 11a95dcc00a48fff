use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use filedrive_shared::CredentialError;
use filedrive_store::StoreError;

use crate::oauth::FederationError;

/// Same body for every credential failure so callers learn nothing about why.
const CREDENTIAL_MESSAGE: &str = "Invalid or expired credentials";

/// Same body for "does not exist" and "not yours".
const NOT_FOUND_MESSAGE: &str = "Resource not found";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Credential subject {0} no longer exists")]
    UserNotFound(Uuid),

    #[error("Not found")]
    NotFound,

    #[error("No access")]
    NoAccess,

    #[error("Invalid parent folder: {0}")]
    InvalidParent(Uuid),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Identity provider error: {0}")]
    Federation(#[from] FederationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound,
            StoreError::InvalidParent(id) => ServerError::InvalidParent(id),
            StoreError::InvalidName(_)
            | StoreError::CycleDetected(_)
            | StoreError::InvalidGrant(_)
            | StoreError::InvalidTransition { .. }
            | StoreError::ChunkOutOfRange { .. } => ServerError::BadRequest(err.to_string()),
            StoreError::Sqlite(_) | StoreError::Io(_) | StoreError::Migration(_) => {
                ServerError::Internal(err.to_string())
            }
        }
    }
}

impl From<CredentialError> for ServerError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Invalid(reason) => {
                tracing::debug!(%reason, "credential rejected");
                ServerError::InvalidCredential
            }
            CredentialError::SigningFailed => ServerError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::InvalidCredential => {
                (StatusCode::UNAUTHORIZED, CREDENTIAL_MESSAGE.to_string())
            }
            ServerError::UserNotFound(id) => {
                tracing::warn!(user_id = %id, "credential for a vanished user");
                (StatusCode::UNAUTHORIZED, CREDENTIAL_MESSAGE.to_string())
            }
            ServerError::NotFound | ServerError::NoAccess => {
                (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE.to_string())
            }
            ServerError::InvalidParent(_) | ServerError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Federation(e) => {
                tracing::warn!(error = %e, "login with identity provider failed");
                (StatusCode::BAD_GATEWAY, "Login with identity provider failed".to_string())
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filedrive_shared::RejectReason;

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(ServerError::from(StoreError::NotFound), ServerError::NotFound));
        assert!(matches!(
            ServerError::from(StoreError::InvalidName("x".into())),
            ServerError::BadRequest(_)
        ));
        assert!(matches!(
            ServerError::from(StoreError::Migration("boom".into())),
            ServerError::Internal(_)
        ));
    }

    #[test]
    fn test_credential_failures_look_identical() {
        let a = ServerError::from(CredentialError::Invalid(RejectReason::Expired)).into_response();
        let b = ServerError::UserNotFound(Uuid::new_v4()).into_response();
        assert_eq!(a.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(b.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_no_access_is_not_found() {
        assert_eq!(ServerError::NoAccess.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(ServerError::NotFound.into_response().status(), StatusCode::NOT_FOUND);
    }
}
