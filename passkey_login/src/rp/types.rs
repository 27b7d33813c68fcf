use chrono::{DateTime, Utc};
use ciborium::value::Value as CborValue;
use ring::digest;
use serde::{Deserialize, Serialize};

use super::config::{ORIGIN, RP_ID, USER_VERIFICATION};
use super::errors::RelyingPartyError;
use crate::storage::CacheData;
use crate::utils::base64url_decode;

/// A pending ceremony, stored keyed by its challenge text until the verify
/// call consumes it.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub(super) struct StoredChallenge {
    pub(super) challenge: String,
    pub(super) user_id: String,
    pub(super) username: String,
    pub(super) timestamp: u64,
    pub(super) ttl: u64,
}

impl From<StoredChallenge> for CacheData {
    fn from(data: StoredChallenge) -> Self {
        Self {
            value: serde_json::to_string(&data).expect("Failed to serialize StoredChallenge"),
        }
    }
}

impl TryFrom<CacheData> for StoredChallenge {
    type Error = RelyingPartyError;

    fn try_from(data: CacheData) -> Result<Self, Self::Error> {
        serde_json::from_str(&data.value).map_err(|e| RelyingPartyError::Storage(e.to_string()))
    }
}

/// A registered account.
#[derive(Clone, Debug)]
pub(crate) struct UserAccount {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) created_at: DateTime<Utc>,
}

/// A stored passkey credential, sufficient to verify later assertions:
/// public key, credential id, and the signature counter.
#[derive(Clone, Debug)]
pub(crate) struct StoredCredential {
    pub(crate) credential_id: String,
    pub(crate) user_id: String,
    /// Uncompressed P-256 point as codec-text
    pub(crate) public_key: String,
    pub(crate) counter: u32,
    pub(crate) user_handle: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_used_at: DateTime<Utc>,
}

#[derive(Debug)]
pub(super) struct AttestationObject {
    pub(super) fmt: String,
    pub(super) auth_data: Vec<u8>,
    pub(super) att_stmt: Vec<(CborValue, CborValue)>,
}

#[derive(Debug)]
pub(super) struct ParsedClientData {
    pub(super) challenge: String,
    pub(super) origin: String,
    pub(super) type_: String,
    pub(super) raw_data: Vec<u8>,
}

impl ParsedClientData {
    pub(super) fn from_base64(client_data_json: &str) -> Result<Self, RelyingPartyError> {
        let raw_data = base64url_decode(client_data_json)
            .map_err(|e| RelyingPartyError::Format(format!("Failed to decode: {e}")))?;

        let data_str = String::from_utf8(raw_data.clone())
            .map_err(|e| RelyingPartyError::Format(format!("Invalid UTF-8: {e}")))?;

        let data: serde_json::Value = serde_json::from_str(&data_str)
            .map_err(|e| RelyingPartyError::Format(format!("Invalid JSON: {e}")))?;

        let challenge_str = data["challenge"]
            .as_str()
            .ok_or_else(|| RelyingPartyError::ClientData("Missing challenge".into()))?;

        Ok(Self {
            challenge: challenge_str.to_string(),
            origin: data["origin"]
                .as_str()
                .ok_or_else(|| RelyingPartyError::ClientData("Missing origin".into()))?
                .to_string(),
            type_: data["type"]
                .as_str()
                .ok_or_else(|| RelyingPartyError::ClientData("Missing type".into()))?
                .to_string(),
            raw_data,
        })
    }

    /// Verify challenge, origin and ceremony type. `expected_type` is
    /// "webauthn.create" for registration, "webauthn.get" for assertion.
    pub(super) fn verify(
        &self,
        stored_challenge: &str,
        expected_type: &str,
    ) -> Result<(), RelyingPartyError> {
        if self.challenge != stored_challenge {
            return Err(RelyingPartyError::Challenge(
                "Challenge mismatch".to_string(),
            ));
        }

        if self.origin != *ORIGIN {
            return Err(RelyingPartyError::ClientData(format!(
                "Invalid origin. Expected: {}, Got: {}",
                *ORIGIN, self.origin
            )));
        }

        if self.type_ != expected_type {
            return Err(RelyingPartyError::ClientData(format!(
                "Invalid type. Expected '{}', Got: {}",
                expected_type, self.type_
            )));
        }

        Ok(())
    }
}

/// Flags carried in the authenticator data structure.
pub(super) mod auth_data_flags {
    /// User Present (UP) - Bit 0
    pub(crate) const UP: u8 = 1 << 0;
    /// User Verified (UV) - Bit 2
    pub(crate) const UV: u8 = 1 << 2;
    /// Backup Eligibility (BE) - Bit 3 - Indicates if credential is discoverable
    pub(crate) const BE: u8 = 1 << 3;
    /// Attested Credential Data Present - Bit 6
    pub(crate) const AT: u8 = 1 << 6;
}

/// Authenticator data: RP ID hash (32 bytes), flags (1 byte), counter
/// (4 bytes, big-endian), then optional attested credential data.
#[derive(Debug)]
pub(super) struct AuthenticatorData {
    pub(super) rp_id_hash: Vec<u8>,
    pub(super) flags: u8,
    pub(super) counter: u32,
    pub(super) raw_data: Vec<u8>,
}

impl AuthenticatorData {
    pub(super) fn from_base64(auth_data: &str) -> Result<Self, RelyingPartyError> {
        let data = base64url_decode(auth_data)
            .map_err(|e| RelyingPartyError::Format(format!("Failed to decode: {e}")))?;

        if data.len() < 37 {
            return Err(RelyingPartyError::AuthenticatorData(
                "Authenticator data too short".into(),
            ));
        }

        Ok(Self {
            rp_id_hash: data[..32].to_vec(),
            flags: data[32],
            counter: u32::from_be_bytes([data[33], data[34], data[35], data[36]]),
            raw_data: data,
        })
    }

    pub(super) fn is_user_present(&self) -> bool {
        (self.flags & auth_data_flags::UP) != 0
    }

    pub(super) fn is_user_verified(&self) -> bool {
        (self.flags & auth_data_flags::UV) != 0
    }

    pub(super) fn is_discoverable(&self) -> bool {
        (self.flags & auth_data_flags::BE) != 0
    }

    pub(super) fn verify(&self) -> Result<(), RelyingPartyError> {
        let expected_hash = digest::digest(&digest::SHA256, RP_ID.as_bytes());
        if self.rp_id_hash != expected_hash.as_ref() {
            return Err(RelyingPartyError::AuthenticatorData(
                "Invalid RP ID hash".to_string(),
            ));
        }

        if !self.is_user_present() {
            return Err(RelyingPartyError::Authentication(
                "User not present".into(),
            ));
        }

        if *USER_VERIFICATION == "required" && !self.is_user_verified() {
            return Err(RelyingPartyError::AuthenticatorData(format!(
                "User verification required but flag not set. Flags: {:02x}",
                self.flags
            )));
        }

        Ok(())
    }
}
