use thiserror::Error;

use crate::storage::StorageError;
use crate::utils::UtilError;

/// Errors that can occur while serving passkey ceremonies.
#[derive(Debug, Error)]
pub enum RelyingPartyError {
    /// Error related to relying-party configuration (e.g., invalid origin)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error with the challenge bound to a ceremony
    #[error("Invalid challenge: {0}")]
    Challenge(String),

    /// Error during the registration ceremony (e.g., duplicate username)
    #[error("Registration error: {0}")]
    Registration(String),

    /// Error during the assertion ceremony
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Error validating the client data JSON from the caller
    #[error("Invalid client data: {0}")]
    ClientData(String),

    /// Error parsing or validating the authenticator data structure
    #[error("Invalid authenticator data: {0}")]
    AuthenticatorData(String),

    /// Error during verification of a ceremony result
    #[error("Verification error: {0}")]
    Verification(String),

    /// Error when a requested resource (user, credential, challenge) is not found
    #[error("Not found error: {0}")]
    NotFound(String),

    /// Error accessing stored ceremony or credential data
    #[error("Storage error: {0}")]
    Storage(String),

    /// Error in cryptographic operations
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Error with improperly formatted data
    #[error("Invalid format: {0}")]
    Format(String),

    /// Error from codec or random-generation helpers
    #[error("Utils error: {0}")]
    Utils(#[from] UtilError),

    /// Error from JSON serialization/deserialization
    #[error("Serde error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl From<StorageError> for RelyingPartyError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
