use async_trait::async_trait;
use thiserror::Error;

use super::types::{
    AssertedCredential, CreatedCredential, CredentialAssertionOptions, CredentialCreationOptions,
};

/// How an authenticator invocation can fail. Cancellation is its own kind
/// because it is the one failure the user can simply retry past.
#[derive(Debug, Error)]
pub enum AuthenticatorError {
    /// The user declined the prompt or the invocation was aborted.
    #[error("Ceremony cancelled")]
    Cancelled,

    /// Anything else: unsupported algorithm, hardware fault, timeout inside
    /// the authenticator itself.
    #[error("{0}")]
    Failed(String),
}

/// The seam to the platform authenticator.
///
/// Implementations receive fully materialized options (all binary material
/// already decoded) and return credentials with raw binary fields; the
/// orchestrator does the codec work on both sides of this boundary.
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    /// Create a new credential bound to the given options.
    async fn create_credential(
        &self,
        options: &CredentialCreationOptions,
    ) -> Result<CreatedCredential, AuthenticatorError>;

    /// Produce an assertion with an existing credential.
    async fn assert_credential(
        &self,
        options: &CredentialAssertionOptions,
    ) -> Result<AssertedCredential, AuthenticatorError>;
}
