use async_trait::async_trait;
use std::time::Duration;

use super::errors::AuthError;
use super::types::VerificationOutcome;
use crate::protocol::{
    AssertionOptions, AssertionVerifyRequest, ErrorResponse, ExistsResponse, LogoutResponse,
    RegistrationOptions, RegistrationVerifyRequest, SessionVerifyResponse, UsernameRequest,
    VerifyResponse,
};

/// The server boundary as the orchestrator sees it: existence checks,
/// challenge fetches, verification submits, and session round-trips.
///
/// This is the only place response bodies are interpreted; everything above
/// it works with typed outcomes.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn exists(&self, username: &str) -> Result<bool, AuthError>;

    async fn registration_options(&self, username: &str)
    -> Result<RegistrationOptions, AuthError>;

    async fn verify_registration(
        &self,
        request: &RegistrationVerifyRequest,
    ) -> Result<VerificationOutcome, AuthError>;

    async fn assertion_options(&self, username: &str) -> Result<AssertionOptions, AuthError>;

    async fn verify_assertion(
        &self,
        request: &AssertionVerifyRequest,
    ) -> Result<VerificationOutcome, AuthError>;

    /// Confirm a persisted bearer token is still live server-side.
    async fn verify_session(&self, token: &str) -> Result<bool, AuthError>;

    /// Invalidate a bearer token server-side.
    async fn logout(&self, token: &str) -> Result<(), AuthError>;
}

/// `AuthApi` over HTTP/JSON with reqwest. Requests carry a caller-chosen
/// timeout; nothing here retries, since a retry needs a fresh ceremony.
#[derive(Debug)]
pub struct HttpAuthApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| AuthError::Network(format!("Invalid server URL: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, AuthError> {
        self.client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))
    }

    async fn post_bearer(&self, path: &str, token: &str) -> Result<reqwest::Response, AuthError> {
        self.client
            .post(self.endpoint(path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))
    }
}

/// Pulls the server-supplied reason out of an error body, if there is one.
async fn rejection_reason(response: reqwest::Response) -> Option<String> {
    response
        .json::<ErrorResponse>()
        .await
        .ok()
        .map(|body| body.error)
}

/// Options fetches: a 4xx with a reason is an explicit refusal (e.g. the
/// username was registered by a concurrent ceremony); anything else is a
/// transport-level failure.
async fn options_fetch_error(response: reqwest::Response) -> AuthError {
    let status = response.status();
    if status.is_client_error() {
        if let Some(reason) = rejection_reason(response).await {
            return AuthError::ServerRejected(reason);
        }
    }
    AuthError::Network(format!("Unexpected response status: {status}"))
}

/// Verification submits: every non-2xx is the server refusing the ceremony.
async fn verify_outcome(response: reqwest::Response) -> Result<VerificationOutcome, AuthError> {
    if !response.status().is_success() {
        let reason = rejection_reason(response)
            .await
            .unwrap_or_else(|| "Verification rejected".to_string());
        return Ok(VerificationOutcome::Failure { reason });
    }

    let body: VerifyResponse = match response.json().await {
        Ok(body) => body,
        Err(e) => {
            return Ok(VerificationOutcome::Failure {
                reason: format!("Malformed verification response: {e}"),
            });
        }
    };

    match body {
        VerifyResponse {
            success: true,
            token: Some(token),
            identity: Some(identity),
        } => Ok(VerificationOutcome::Success { token, identity }),
        VerifyResponse { success: true, .. } => Ok(VerificationOutcome::Failure {
            reason: "Verification response missing token or identity".to_string(),
        }),
        VerifyResponse { success: false, .. } => Ok(VerificationOutcome::Failure {
            reason: "Verification rejected".to_string(),
        }),
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn exists(&self, username: &str) -> Result<bool, AuthError> {
        let response = self
            .post_json(
                "/auth/id",
                &UsernameRequest {
                    username: username.to_string(),
                },
            )
            .await?;

        if !response.status().is_success() {
            // Never guess "does not exist" from a failed check
            return Err(AuthError::Network(format!(
                "Existence check failed with status: {}",
                response.status()
            )));
        }

        let body: ExistsResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("Malformed existence response: {e}")))?;

        Ok(body.exists)
    }

    async fn registration_options(
        &self,
        username: &str,
    ) -> Result<RegistrationOptions, AuthError> {
        let response = self
            .post_json(
                "/auth/register/challenge",
                &UsernameRequest {
                    username: username.to_string(),
                },
            )
            .await?;

        if !response.status().is_success() {
            return Err(options_fetch_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("Malformed registration options: {e}")))
    }

    async fn verify_registration(
        &self,
        request: &RegistrationVerifyRequest,
    ) -> Result<VerificationOutcome, AuthError> {
        let response = self.post_json("/auth/register", request).await?;
        verify_outcome(response).await
    }

    async fn assertion_options(&self, username: &str) -> Result<AssertionOptions, AuthError> {
        let response = self
            .post_json(
                "/auth/login/challenge",
                &UsernameRequest {
                    username: username.to_string(),
                },
            )
            .await?;

        if !response.status().is_success() {
            return Err(options_fetch_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("Malformed assertion options: {e}")))
    }

    async fn verify_assertion(
        &self,
        request: &AssertionVerifyRequest,
    ) -> Result<VerificationOutcome, AuthError> {
        let response = self.post_json("/auth/login", request).await?;
        verify_outcome(response).await
    }

    async fn verify_session(&self, token: &str) -> Result<bool, AuthError> {
        let response = self.post_bearer("/auth/verify", token).await?;

        if !response.status().is_success() {
            return Err(AuthError::Network(format!(
                "Session verification failed with status: {}",
                response.status()
            )));
        }

        let body: SessionVerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("Malformed session response: {e}")))?;

        Ok(body.valid)
    }

    async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let response = self.post_bearer("/auth/logout", token).await?;

        if !response.status().is_success() {
            return Err(AuthError::Network(format!(
                "Logout failed with status: {}",
                response.status()
            )));
        }

        let _body: LogoutResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("Malformed logout response: {e}")))?;

        Ok(())
    }
}
