use ciborium::value::{Integer, Value as CborValue};
use ring::digest;

use super::config::{RP_ID, USER_VERIFICATION};
use super::errors::RelyingPartyError;
use super::types::{AttestationObject, auth_data_flags};
use crate::utils::{base64url_decode, base64url_encode};

/// Credential material extracted from attested authenticator data.
#[derive(Debug)]
pub(super) struct AttestedCredential {
    /// Codec-text credential id
    pub(super) credential_id: String,
    /// Codec-text uncompressed P-256 point (0x04 || x || y)
    pub(super) public_key: String,
}

pub(super) fn parse_attestation_object(
    attestation_base64: &str,
) -> Result<AttestationObject, RelyingPartyError> {
    let attestation_bytes = base64url_decode(attestation_base64)
        .map_err(|e| RelyingPartyError::Format(format!("Failed to decode attestation object: {e}")))?;

    let attestation_cbor: CborValue = ciborium::de::from_reader(&attestation_bytes[..])
        .map_err(|e| RelyingPartyError::Format(format!("Invalid CBOR data: {e}")))?;

    let CborValue::Map(map) = attestation_cbor else {
        return Err(RelyingPartyError::Format(
            "Invalid attestation format".to_string(),
        ));
    };

    let mut fmt = None;
    let mut auth_data = None;
    let mut att_stmt = None;

    for (key, value) in map {
        if let CborValue::Text(k) = key {
            match k.as_str() {
                "fmt" => {
                    if let CborValue::Text(f) = value {
                        fmt = Some(f);
                    }
                }
                "authData" => {
                    if let CborValue::Bytes(data) = value {
                        auth_data = Some(data);
                    }
                }
                "attStmt" => {
                    if let CborValue::Map(stmt) = value {
                        att_stmt = Some(stmt);
                    }
                }
                _ => {}
            }
        }
    }

    match (fmt, auth_data, att_stmt) {
        (Some(f), Some(d), Some(s)) => Ok(AttestationObject {
            fmt: f,
            auth_data: d,
            att_stmt: s,
        }),
        _ => Err(RelyingPartyError::Format(
            "Missing required attestation data".to_string(),
        )),
    }
}

/// Verifies the attestation object and extracts the new credential.
///
/// Registration options request `attestation: "none"`, so only the `none`
/// format is accepted here; anything carrying an attestation statement is
/// refused rather than half-verified.
pub(super) fn verify_attestation(
    attestation: &AttestationObject,
) -> Result<AttestedCredential, RelyingPartyError> {
    if attestation.fmt != "none" {
        return Err(RelyingPartyError::Format(format!(
            "Unsupported attestation format: {}",
            attestation.fmt
        )));
    }

    if !attestation.att_stmt.is_empty() {
        return Err(RelyingPartyError::Format(
            "attStmt must be empty for none attestation".to_string(),
        ));
    }

    if attestation.auth_data.len() < 37 {
        return Err(RelyingPartyError::AuthenticatorData(
            "Authenticator data too short".to_string(),
        ));
    }

    let rp_id_hash = digest::digest(&digest::SHA256, RP_ID.as_bytes());
    if attestation.auth_data[..32] != rp_id_hash.as_ref()[..] {
        return Err(RelyingPartyError::Verification(
            "Invalid RP ID hash".to_string(),
        ));
    }

    let flags = attestation.auth_data[32];
    if (flags & auth_data_flags::UP) == 0 {
        return Err(RelyingPartyError::AuthenticatorData(
            "User Present flag not set".to_string(),
        ));
    }

    if *USER_VERIFICATION == "required" && (flags & auth_data_flags::UV) == 0 {
        return Err(RelyingPartyError::AuthenticatorData(
            "User Verification required but flag not set".to_string(),
        ));
    }

    if (flags & auth_data_flags::AT) == 0 {
        return Err(RelyingPartyError::AuthenticatorData(
            "No attested credential data".to_string(),
        ));
    }

    extract_attested_credential(&attestation.auth_data)
}

fn extract_attested_credential(
    auth_data: &[u8],
) -> Result<AttestedCredential, RelyingPartyError> {
    let mut pos = 37; // RP ID hash (32) + flags (1) + counter (4)

    if auth_data.len() < pos + 18 {
        return Err(RelyingPartyError::Format(
            "Authenticator data too short".to_string(),
        ));
    }

    pos += 16; // AAGUID

    let cred_id_len = ((auth_data[pos] as usize) << 8) | (auth_data[pos + 1] as usize);
    pos += 2;

    if cred_id_len == 0 || cred_id_len > 1024 {
        return Err(RelyingPartyError::Format(
            "Invalid credential ID length".to_string(),
        ));
    }

    if auth_data.len() < pos + cred_id_len {
        return Err(RelyingPartyError::Format(
            "Authenticator data too short for credential ID".to_string(),
        ));
    }

    let credential_id = base64url_encode(&auth_data[pos..pos + cred_id_len]);
    pos += cred_id_len;

    let (x_coord, y_coord) = extract_key_coordinates(&auth_data[pos..])?;

    let mut public_key = Vec::with_capacity(65);
    public_key.push(0x04); // Uncompressed point format
    public_key.extend_from_slice(&x_coord);
    public_key.extend_from_slice(&y_coord);

    Ok(AttestedCredential {
        credential_id,
        public_key: base64url_encode(public_key),
    })
}

fn extract_key_coordinates(credential_data: &[u8]) -> Result<(Vec<u8>, Vec<u8>), RelyingPartyError> {
    let public_key_cbor: CborValue = ciborium::de::from_reader(credential_data)
        .map_err(|e| RelyingPartyError::Format(format!("Invalid public key CBOR: {e}")))?;

    let CborValue::Map(map) = public_key_cbor else {
        return Err(RelyingPartyError::Format(
            "Invalid public key format".to_string(),
        ));
    };

    let mut x_coord = None;
    let mut y_coord = None;

    for (key, value) in map {
        if let CborValue::Integer(i) = key {
            if i == Integer::from(-2) {
                if let CborValue::Bytes(x) = value {
                    x_coord = Some(x);
                }
            } else if i == Integer::from(-3) {
                if let CborValue::Bytes(y) = value {
                    y_coord = Some(y);
                }
            }
        }
    }

    match (x_coord, y_coord) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(RelyingPartyError::Format(
            "Missing or invalid key coordinates".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        build_attestation_object, build_cose_p256_key, init_test_environment,
    };

    #[test]
    fn test_parse_and_verify_none_attestation() {
        init_test_environment();

        let cose_key = build_cose_p256_key(&[0x02; 32], &[0x03; 32]);
        let encoded = build_attestation_object("none", true, "localhost", &[0x05; 16], &cose_key);

        let attestation = parse_attestation_object(&encoded).unwrap();
        assert_eq!(attestation.fmt, "none");

        let credential = verify_attestation(&attestation).unwrap();
        assert_eq!(credential.credential_id, base64url_encode([0x05; 16]));

        let key = base64url_decode(&credential.public_key).unwrap();
        assert_eq!(key.len(), 65);
        assert_eq!(key[0], 0x04);
        assert_eq!(&key[1..33], &[0x02; 32]);
        assert_eq!(&key[33..65], &[0x03; 32]);
    }

    #[test]
    fn test_rejects_non_none_format() {
        init_test_environment();

        let cose_key = build_cose_p256_key(&[0x02; 32], &[0x03; 32]);
        let encoded = build_attestation_object("packed", true, "localhost", &[0x05; 16], &cose_key);

        let attestation = parse_attestation_object(&encoded).unwrap();
        match verify_attestation(&attestation) {
            Err(RelyingPartyError::Format(msg)) => {
                assert!(msg.contains("Unsupported attestation format"));
            }
            other => panic!("Expected Format error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_non_empty_att_stmt() {
        init_test_environment();

        let cose_key = build_cose_p256_key(&[0x02; 32], &[0x03; 32]);
        let encoded = build_attestation_object("none", false, "localhost", &[0x05; 16], &cose_key);

        let attestation = parse_attestation_object(&encoded).unwrap();
        match verify_attestation(&attestation) {
            Err(RelyingPartyError::Format(msg)) => {
                assert!(msg.contains("attStmt must be empty"));
            }
            other => panic!("Expected Format error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_wrong_rp_id_hash() {
        init_test_environment();

        let cose_key = build_cose_p256_key(&[0x02; 32], &[0x03; 32]);
        let encoded =
            build_attestation_object("none", true, "evil.example", &[0x05; 16], &cose_key);

        let attestation = parse_attestation_object(&encoded).unwrap();
        match verify_attestation(&attestation) {
            Err(RelyingPartyError::Verification(msg)) => {
                assert!(msg.contains("RP ID hash"));
            }
            other => panic!("Expected Verification error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_garbage_bytes() {
        init_test_environment();

        let encoded = base64url_encode([0xff, 0x00, 0x13, 0x37]);
        assert!(matches!(
            parse_attestation_object(&encoded),
            Err(RelyingPartyError::Format(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_codec_text() {
        init_test_environment();

        assert!(matches!(
            parse_attestation_object("!!!not-codec-text!!!"),
            Err(RelyingPartyError::Format(_))
        ));
    }
}
