use std::sync::Arc;
use tokio::sync::Notify;

use super::api::AuthApi;
use super::authenticator::{AuthenticatorError, PlatformAuthenticator};
use super::errors::AuthError;
use super::session::SessionManager;
use super::types::{
    CredentialAssertionOptions, CredentialCreationOptions, Session, VerificationOutcome,
};
use crate::protocol::{
    AssertionCredential, AssertionResponse, AssertionVerifyRequest, AttestationResponse,
    RegistrationCredential, RegistrationVerifyRequest,
};
use crate::utils::base64url_encode;

/// The states one ceremony moves through. `Succeeded` and `Failed` are
/// terminal; a retry is a whole new ceremony.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyState {
    Idle,
    ResolvingExistence,
    Registering,
    Authenticating,
    Verifying,
    Succeeded,
    Failed,
}

/// Cancels an in-flight assertion wait. Arming the signal before the
/// ceremony reaches the authenticator also works: the pending notification
/// is consumed at the suspension point.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<Notify>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.inner.notify_one();
    }

    async fn wait(&self) {
        self.inner.notified().await;
    }
}

struct Ceremony {
    username: String,
    state: CeremonyState,
}

impl Ceremony {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            state: CeremonyState::Idle,
        }
    }

    fn transition(&mut self, next: CeremonyState) {
        tracing::debug!(
            "Ceremony for '{}': {:?} -> {:?}",
            self.username,
            self.state,
            next
        );
        self.state = next;
    }
}

/// Drives one full registration-or-assertion ceremony per `authenticate`
/// call: existence check, challenge fetch, authenticator invocation,
/// verification submit, session commit.
///
/// The orchestrator assumes at most one active ceremony at a time; callers
/// gate concurrent starts (e.g. by disabling the trigger control).
pub struct Orchestrator<A: PlatformAuthenticator> {
    api: Arc<dyn AuthApi>,
    authenticator: A,
    sessions: SessionManager,
}

impl<A: PlatformAuthenticator> Orchestrator<A> {
    pub fn new(api: Arc<dyn AuthApi>, authenticator: A, sessions: SessionManager) -> Self {
        Self {
            api,
            authenticator,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Runs a ceremony with no external cancellation.
    pub async fn authenticate(&self, username: &str) -> Result<Session, AuthError> {
        self.authenticate_with_abort(username, &AbortSignal::new())
            .await
    }

    /// Runs a ceremony; `abort` cancels the assertion wait and resolves the
    /// ceremony as `UserCancelled`.
    pub async fn authenticate_with_abort(
        &self,
        username: &str,
        abort: &AbortSignal,
    ) -> Result<Session, AuthError> {
        let mut ceremony = Ceremony::new(username);

        let result = self.drive(&mut ceremony, username, abort).await;
        match &result {
            Ok(session) => {
                ceremony.transition(CeremonyState::Succeeded);
                tracing::info!("Authenticated as '{}'", session.identity);
            }
            Err(e) => {
                ceremony.transition(CeremonyState::Failed);
                tracing::debug!("Ceremony for '{}' failed: {}", username, e);
            }
        }
        result
    }

    async fn drive(
        &self,
        ceremony: &mut Ceremony,
        username: &str,
        abort: &AbortSignal,
    ) -> Result<Session, AuthError> {
        ceremony.transition(CeremonyState::ResolvingExistence);
        // A failed existence check aborts the ceremony; guessing either way
        // risks a duplicate registration or a doomed login.
        let exists = self.api.exists(username).await?;

        let outcome = if exists {
            ceremony.transition(CeremonyState::Authenticating);
            self.run_assertion(ceremony, username, abort).await?
        } else {
            ceremony.transition(CeremonyState::Registering);
            self.run_registration(ceremony, username).await?
        };

        match outcome {
            VerificationOutcome::Success { token, identity } => {
                self.sessions.commit(token, identity).await
            }
            VerificationOutcome::Failure { reason } => Err(AuthError::ServerRejected(reason)),
        }
    }

    async fn run_registration(
        &self,
        ceremony: &mut Ceremony,
        username: &str,
    ) -> Result<VerificationOutcome, AuthError> {
        let wire = self.api.registration_options(username).await?;
        let options = CredentialCreationOptions::materialize(wire)?;

        let created = self
            .authenticator
            .create_credential(&options)
            .await
            .map_err(map_authenticator_error)?;

        let request = RegistrationVerifyRequest {
            username: username.to_string(),
            user_id: base64url_encode(&options.user_id),
            challenge: base64url_encode(&options.challenge),
            credential: RegistrationCredential {
                id: created.id,
                type_: "public-key".to_string(),
                raw_id: base64url_encode(&created.raw_id),
                response: AttestationResponse {
                    attestation_object: base64url_encode(&created.attestation_object),
                    client_data_json: base64url_encode(&created.client_data_json),
                },
            },
        };

        ceremony.transition(CeremonyState::Verifying);
        self.api.verify_registration(&request).await
    }

    async fn run_assertion(
        &self,
        ceremony: &mut Ceremony,
        username: &str,
        abort: &AbortSignal,
    ) -> Result<VerificationOutcome, AuthError> {
        let wire = self.api.assertion_options(username).await?;
        let options = CredentialAssertionOptions::materialize(wire)?;

        let asserted = tokio::select! {
            result = self.authenticator.assert_credential(&options) => result,
            _ = abort.wait() => Err(AuthenticatorError::Cancelled),
        }
        .map_err(map_authenticator_error)?;

        let request = AssertionVerifyRequest {
            username: username.to_string(),
            credential: AssertionCredential {
                id: asserted.id,
                type_: "public-key".to_string(),
                raw_id: base64url_encode(&asserted.raw_id),
                response: AssertionResponse {
                    client_data_json: base64url_encode(&asserted.client_data_json),
                    authenticator_data: base64url_encode(&asserted.authenticator_data),
                    signature: base64url_encode(&asserted.signature),
                    user_handle: asserted.user_handle.map(base64url_encode),
                },
            },
        };

        ceremony.transition(CeremonyState::Verifying);
        self.api.verify_assertion(&request).await
    }
}

/// Cancellation (user-declined or externally aborted) is its own error
/// kind; it must never look like a transport failure.
fn map_authenticator_error(e: AuthenticatorError) -> AuthError {
    match e {
        AuthenticatorError::Cancelled => AuthError::UserCancelled,
        AuthenticatorError::Failed(msg) => AuthError::Ceremony(msg),
    }
}
