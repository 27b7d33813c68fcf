use axum::{
    Json,
    http::{HeaderMap, header::AUTHORIZATION},
};

use passkey_login::{
    AssertionOptions, AssertionVerifyRequest, ExistsResponse, LogoutResponse, RegistrationOptions,
    RegistrationVerifyRequest, SessionVerifyResponse, UsernameRequest, VerifyResponse,
};

use crate::error::ApiError;

/// Existence check: `{username}` in, `{exists}` out. Failures are real
/// errors, never reported as "does not exist".
pub(crate) async fn check_username(
    Json(request): Json<UsernameRequest>,
) -> Result<Json<ExistsResponse>, ApiError> {
    let exists = passkey_login::username_exists(&request.username).await?;
    Ok(Json(ExistsResponse { exists }))
}

pub(crate) async fn registration_challenge(
    Json(request): Json<UsernameRequest>,
) -> Result<Json<RegistrationOptions>, ApiError> {
    let options = passkey_login::start_registration(&request.username).await?;
    Ok(Json(options))
}

pub(crate) async fn registration_verify(
    Json(request): Json<RegistrationVerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let issued = passkey_login::finish_registration(&request).await?;
    Ok(Json(VerifyResponse {
        success: true,
        token: Some(issued.token),
        identity: Some(issued.identity),
    }))
}

pub(crate) async fn login_challenge(
    Json(request): Json<UsernameRequest>,
) -> Result<Json<AssertionOptions>, ApiError> {
    let options = passkey_login::start_assertion(&request.username).await?;
    Ok(Json(options))
}

pub(crate) async fn login_verify(
    Json(request): Json<AssertionVerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let issued = passkey_login::finish_assertion(&request).await?;
    Ok(Json(VerifyResponse {
        success: true,
        token: Some(issued.token),
        identity: Some(issued.identity),
    }))
}

pub(crate) async fn session_verify(
    headers: HeaderMap,
) -> Result<Json<SessionVerifyResponse>, ApiError> {
    let Some(token) = bearer_token(&headers) else {
        return Ok(Json(SessionVerifyResponse {
            valid: false,
            identity: None,
        }));
    };

    let identity = passkey_login::verify_token(token).await?;
    Ok(Json(SessionVerifyResponse {
        valid: identity.is_some(),
        identity,
    }))
}

/// Logout is best-effort: an absent or unknown token still answers `ok`.
pub(crate) async fn logout(headers: HeaderMap) -> Result<Json<LogoutResponse>, ApiError> {
    if let Some(token) = bearer_token(&headers) {
        passkey_login::revoke_token(token).await?;
    } else {
        tracing::debug!("Logout without bearer token; nothing to revoke");
    }

    Ok(Json(LogoutResponse { ok: true }))
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}
