mod assertion;
mod attestation;
mod challenge;
mod config;
mod errors;
mod register;
mod store;
mod token;
mod types;

pub use assertion::{finish_assertion, start_assertion};
pub use errors::RelyingPartyError;
pub use register::{finish_registration, start_registration, username_exists};
pub use token::{IssuedToken, issue_token, revoke_token, verify_token};

pub(crate) use store::CredentialStore;

/// Initialize the relying-party persistence layer (creates tables if needed).
pub async fn init() -> Result<(), RelyingPartyError> {
    CredentialStore::init().await
}
