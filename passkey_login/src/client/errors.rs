use thiserror::Error;

use crate::utils::UtilError;

/// Failure taxonomy for one authentication attempt.
///
/// Every failure ends the current ceremony and returns control to the
/// caller; a retry is a fresh `authenticate` call with a fresh challenge.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Transport failure or unexpected non-2xx response; no ceremony state
    /// was changed on the server as far as this client knows.
    #[error("Network error: {0}")]
    Network(String),

    /// The user declined or aborted the authenticator prompt. Recoverable;
    /// the user may simply try again.
    #[error("Ceremony cancelled by user")]
    UserCancelled,

    /// The authenticator failed for a reason other than cancellation.
    #[error("Ceremony error: {0}")]
    Ceremony(String),

    /// The server explicitly refused the ceremony (duplicate username,
    /// invalid challenge, signature mismatch, ...).
    #[error("Server rejected: {0}")]
    ServerRejected(String),

    /// Malformed codec-text where valid material was required. Indicates a
    /// contract violation between client and server.
    #[error("Codec error: {0}")]
    Codec(#[from] UtilError),

    /// A persisted token turned out to be invalid on re-verification.
    #[error("Session expired")]
    SessionExpired,

    /// The local session record could not be read or written.
    #[error("Session storage error: {0}")]
    SessionStore(String),
}
