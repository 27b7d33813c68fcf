use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::AuthError;
use crate::protocol::{
    AssertionOptions, AuthenticatorSelection, PubKeyCredParam, RegistrationOptions,
};
use crate::utils::base64url_decode;

/// Fully materialized credential-creation options: everything the wire
/// carried as codec-text is decoded to bytes before the authenticator sees
/// it.
#[derive(Debug, Clone)]
pub struct CredentialCreationOptions {
    pub rp_id: String,
    pub rp_name: String,
    pub user_id: Vec<u8>,
    pub username: String,
    pub display_name: String,
    pub challenge: Vec<u8>,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    pub authenticator_selection: AuthenticatorSelection,
    pub attestation: String,
    pub timeout: u32,
}

impl CredentialCreationOptions {
    pub(super) fn materialize(wire: RegistrationOptions) -> Result<Self, AuthError> {
        Ok(Self {
            rp_id: wire.rp_id,
            rp_name: wire.rp.name,
            user_id: base64url_decode(&wire.user.id)?,
            username: wire.user.name,
            display_name: wire.user.display_name,
            challenge: base64url_decode(&wire.challenge)?,
            pub_key_cred_params: wire.pub_key_cred_params,
            authenticator_selection: wire.authenticator_selection,
            attestation: wire.attestation,
            timeout: wire.timeout,
        })
    }
}

/// Fully materialized credential-assertion options.
#[derive(Debug, Clone)]
pub struct CredentialAssertionOptions {
    pub rp_id: String,
    pub challenge: Vec<u8>,
    pub allowed_credential_ids: Vec<Vec<u8>>,
    pub user_verification: String,
    pub timeout: u32,
}

impl CredentialAssertionOptions {
    pub(super) fn materialize(wire: AssertionOptions) -> Result<Self, AuthError> {
        let allowed_credential_ids = wire
            .allow_credentials
            .iter()
            .map(|cred| base64url_decode(&cred.id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rp_id: wire.rp_id,
            challenge: base64url_decode(&wire.challenge)?,
            allowed_credential_ids,
            user_verification: wire.user_verification,
            timeout: wire.timeout,
        })
    }
}

/// Result of a credential-creation ceremony. The binary fields are opaque
/// here: they are re-encoded and forwarded, never inspected.
#[derive(Debug, Clone)]
pub struct CreatedCredential {
    pub id: String,
    pub raw_id: Vec<u8>,
    pub attestation_object: Vec<u8>,
    pub client_data_json: Vec<u8>,
}

/// Result of a credential-assertion ceremony.
#[derive(Debug, Clone)]
pub struct AssertedCredential {
    pub id: String,
    pub raw_id: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
}

/// Canonical outcome of a verification submit. Produced only by the server
/// boundary adapter; nothing else interprets verify response bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success { token: String, identity: String },
    Failure { reason: String },
}

/// A live, server-confirmed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub identity: String,
    pub established_at: DateTime<Utc>,
}

/// The one durable record the session manager owns. Token and identity are
/// persisted as a single serialized value so no reader can ever observe one
/// without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub token: String,
    pub identity: String,
    pub established_at: DateTime<Utc>,
}

impl From<&Session> for PersistedSession {
    fn from(session: &Session) -> Self {
        Self {
            token: session.token.clone(),
            identity: session.identity.clone(),
            established_at: session.established_at,
        }
    }
}

impl From<PersistedSession> for Session {
    fn from(record: PersistedSession) -> Self {
        Self {
            token: record.token,
            identity: record.identity,
            established_at: record.established_at,
        }
    }
}
