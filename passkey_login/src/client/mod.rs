mod api;
mod authenticator;
mod errors;
mod orchestrator;
mod session;
#[cfg(test)]
pub(crate) mod test_support;
mod types;

pub use api::{AuthApi, HttpAuthApi};
pub use authenticator::{AuthenticatorError, PlatformAuthenticator};
pub use errors::AuthError;
pub use orchestrator::{AbortSignal, CeremonyState, Orchestrator};
pub use session::{FileSessionStore, MemorySessionStore, SessionManager, SessionStore};
pub use types::{
    AssertedCredential, CreatedCredential, CredentialAssertionOptions, CredentialCreationOptions,
    PersistedSession, Session, VerificationOutcome,
};
