//! passkey_login - Passkey authentication orchestrator and relying party
//!
//! The client half drives one registration-or-assertion ceremony per
//! `authenticate` call against a platform authenticator and converts a
//! verified ceremony into a persisted session. The relying-party half
//! issues single-use challenges, verifies ceremony results, and manages
//! bearer tokens; `passkey_login_axum` exposes it over HTTP.

mod client;
mod config;
mod protocol;
mod rp;
mod storage;
#[cfg(test)]
pub(crate) mod test_utils;
mod utils;

pub use client::{
    AbortSignal, AssertedCredential, AuthApi, AuthError, AuthenticatorError, CeremonyState,
    CreatedCredential, CredentialAssertionOptions, CredentialCreationOptions, FileSessionStore,
    HttpAuthApi, MemorySessionStore, Orchestrator, PersistedSession, PlatformAuthenticator,
    Session, SessionManager, SessionStore, VerificationOutcome,
};

pub use protocol::{
    AllowCredential, AssertionCredential, AssertionOptions, AssertionResponse,
    AssertionVerifyRequest, AttestationResponse, AuthenticatorSelection, ErrorResponse,
    ExistsResponse, LogoutResponse, PubKeyCredParam, RegistrationCredential, RegistrationOptions,
    RegistrationVerifyRequest, RelyingPartyInfo, SessionVerifyResponse, UserEntity,
    UsernameRequest, VerifyResponse,
};

pub use rp::{
    IssuedToken, RelyingPartyError, finish_assertion, finish_registration, issue_token,
    revoke_token, start_assertion, start_registration, username_exists, verify_token,
};

pub use config::AUTH_ROUTE_PREFIX;
pub use utils::{UtilError, base64url_decode, base64url_encode, gen_random_string};

/// Initialize the relying-party stores.
pub async fn init() -> Result<(), RelyingPartyError> {
    rp::init().await
}
