use ring::{digest, signature::UnparsedPublicKey};

use super::challenge::{ASSERTION_CHALLENGE, put_challenge, take_challenge, unix_now};
use super::config::{CEREMONY_TIMEOUT, CHALLENGE_TTL, RP_ID, USER_VERIFICATION};
use super::errors::RelyingPartyError;
use super::store::CredentialStore;
use super::token::{IssuedToken, issue_token};
use super::types::{
    AuthenticatorData, ParsedClientData, StoredChallenge, StoredCredential,
};
use crate::protocol::{AllowCredential, AssertionOptions, AssertionVerifyRequest};
use crate::utils::{base64url_decode, gen_random_string};

/// Starts an assertion ceremony for a registered username: mints a fresh
/// challenge and lists the credentials the authenticator may use.
pub async fn start_assertion(username: &str) -> Result<AssertionOptions, RelyingPartyError> {
    if username.is_empty() {
        return Err(RelyingPartyError::Format("Username is required".to_string()));
    }

    let user = CredentialStore::get_user_by_username(username)
        .await?
        .ok_or_else(|| RelyingPartyError::NotFound("User not found".to_string()))?;

    let allow_credentials = CredentialStore::credential_ids_for_user(&user.id)
        .await?
        .into_iter()
        .map(|id| AllowCredential {
            type_: "public-key".to_string(),
            id,
        })
        .collect();

    let challenge = gen_random_string(32)?;

    put_challenge(
        ASSERTION_CHALLENGE,
        StoredChallenge {
            challenge: challenge.clone(),
            user_id: user.id,
            username: username.to_string(),
            timestamp: unix_now(),
            ttl: *CHALLENGE_TTL,
        },
    )
    .await?;

    let options = AssertionOptions {
        challenge,
        timeout: (*CEREMONY_TIMEOUT) * 1000, // Convert seconds to milliseconds
        rp_id: RP_ID.to_string(),
        allow_credentials,
        user_verification: USER_VERIFICATION.to_string(),
    };

    tracing::debug!("Assertion options: {:?}", options);

    Ok(options)
}

/// Finishes an assertion ceremony: consumes the bound challenge, verifies
/// client data, authenticator data, counter, and signature, then issues a
/// bearer token.
pub async fn finish_assertion(
    request: &AssertionVerifyRequest,
) -> Result<IssuedToken, RelyingPartyError> {
    tracing::debug!("finish_assertion for username: {}", request.username);

    if request.credential.type_ != "public-key" {
        return Err(RelyingPartyError::ClientData(format!(
            "Invalid credential type: {}",
            request.credential.type_
        )));
    }

    let client_data = ParsedClientData::from_base64(&request.credential.response.client_data_json)?;

    // The signed challenge is the lookup key; taking it enforces single use.
    let stored = take_challenge(ASSERTION_CHALLENGE, &client_data.challenge).await?;

    client_data.verify(&stored.challenge, "webauthn.get")?;

    if stored.username != request.username {
        return Err(RelyingPartyError::Authentication(
            "Username does not match the pending ceremony".to_string(),
        ));
    }

    let auth_data = AuthenticatorData::from_base64(&request.credential.response.authenticator_data)?;
    auth_data.verify()?;

    let stored_credential = CredentialStore::get_credential(&request.credential.id)
        .await?
        .ok_or_else(|| {
            tracing::error!("Credential not found: {}", request.credential.id);
            RelyingPartyError::NotFound("Credential not found".to_string())
        })?;

    if stored_credential.user_id != stored.user_id {
        return Err(RelyingPartyError::Authentication(
            "Credential does not belong to this user".to_string(),
        ));
    }

    verify_user_handle(request, &stored_credential, auth_data.is_discoverable())?;
    verify_counter(&request.credential.id, &auth_data, &stored_credential).await?;
    verify_signature(request, &client_data, &auth_data, &stored_credential)?;

    CredentialStore::touch_credential(&request.credential.id).await?;

    tracing::info!("Assertion verified for username: {}", stored.username);

    issue_token(&stored.user_id, &stored.username).await
}

/// For discoverable credentials a user handle is required; otherwise it is
/// optional, but when present it must match the stored credential.
fn verify_user_handle(
    request: &AssertionVerifyRequest,
    stored_credential: &StoredCredential,
    is_discoverable: bool,
) -> Result<(), RelyingPartyError> {
    match (
        request.credential.response.user_handle.as_deref(),
        is_discoverable,
    ) {
        (Some(handle), _) if handle != stored_credential.user_handle => {
            tracing::error!(
                "User handle mismatch: {} != {}",
                handle,
                stored_credential.user_handle
            );
            Err(RelyingPartyError::Authentication(
                "User handle mismatch".to_string(),
            ))
        }
        (None, true) => Err(RelyingPartyError::Authentication(
            "Missing required user handle for discoverable credential".to_string(),
        )),
        _ => Ok(()),
    }
}

/// The counter must increase between assertions; a decrease suggests a
/// cloned credential. Counter 0 means the authenticator has no counter.
async fn verify_counter(
    credential_id: &str,
    auth_data: &AuthenticatorData,
    stored_credential: &StoredCredential,
) -> Result<(), RelyingPartyError> {
    let auth_counter = auth_data.counter;
    tracing::debug!(
        "Counter verification - stored: {}, received: {}",
        stored_credential.counter,
        auth_counter
    );

    if auth_counter == 0 {
        tracing::info!("Authenticator does not support counters (received counter=0)");
    } else if auth_counter <= stored_credential.counter {
        tracing::warn!(
            "Counter verification failed - stored: {}, received: {}",
            stored_credential.counter,
            auth_counter
        );
        return Err(RelyingPartyError::Authentication(
            "Counter value decreased - possible credential cloning detected".to_string(),
        ));
    } else {
        CredentialStore::update_credential_counter(credential_id, auth_counter).await?;
    }

    Ok(())
}

fn verify_signature(
    request: &AssertionVerifyRequest,
    client_data: &ParsedClientData,
    auth_data: &AuthenticatorData,
    stored_credential: &StoredCredential,
) -> Result<(), RelyingPartyError> {
    let verification_algorithm = &ring::signature::ECDSA_P256_SHA256_ASN1;

    let public_key = base64url_decode(&stored_credential.public_key)
        .map_err(|e| RelyingPartyError::Format(format!("Invalid public key: {e}")))?;

    let unparsed_public_key = UnparsedPublicKey::new(verification_algorithm, &public_key);

    let signature = base64url_decode(&request.credential.response.signature)
        .map_err(|e| RelyingPartyError::Format(format!("Invalid signature: {e}")))?;

    // Authenticators sign authenticator_data || SHA256(client_data)
    let client_data_hash = digest::digest(&digest::SHA256, &client_data.raw_data);
    let mut signed_data = Vec::new();
    signed_data.extend_from_slice(&auth_data.raw_data);
    signed_data.extend_from_slice(client_data_hash.as_ref());

    match unparsed_public_key.verify(&signed_data, &signature) {
        Ok(_) => {
            tracing::debug!("Signature verification successful");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Signature verification failed: {:?}", e);
            Err(RelyingPartyError::Verification(
                "Signature verification failed".to_string(),
            ))
        }
    }
}
