use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use passkey_login::RelyingPartyError;

/// Converts relying-party errors into `(status, {"error": ...})` responses.
/// The reason string is what clients surface as an explicit rejection.
pub struct ApiError(pub RelyingPartyError);

impl From<RelyingPartyError> for ApiError {
    fn from(err: RelyingPartyError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            RelyingPartyError::Challenge(_)
            | RelyingPartyError::Registration(_)
            | RelyingPartyError::Authentication(_)
            | RelyingPartyError::ClientData(_)
            | RelyingPartyError::AuthenticatorData(_)
            | RelyingPartyError::Verification(_)
            | RelyingPartyError::Format(_) => StatusCode::BAD_REQUEST,
            RelyingPartyError::NotFound(_) => StatusCode::NOT_FOUND,
            RelyingPartyError::Config(_)
            | RelyingPartyError::Storage(_)
            | RelyingPartyError::Crypto(_)
            | RelyingPartyError::Utils(_)
            | RelyingPartyError::SerdeJson(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!("Relying-party error: {}", self.0);
        } else {
            tracing::debug!("Rejected request: {}", self.0);
        }

        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_error_maps_to_bad_request() {
        let err = ApiError(RelyingPartyError::Registration(
            "Username already exists".to_string(),
        ));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let err = ApiError(RelyingPartyError::NotFound("User not found".to_string()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_storage_error_maps_to_500() {
        let err = ApiError(RelyingPartyError::Storage("db down".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
