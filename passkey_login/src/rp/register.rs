use super::attestation::{parse_attestation_object, verify_attestation};
use super::challenge::{REGISTRATION_CHALLENGE, put_challenge, take_challenge, unix_now};
use super::config::{CEREMONY_TIMEOUT, CHALLENGE_TTL, RP_ID, RP_NAME, USER_VERIFICATION};
use super::errors::RelyingPartyError;
use super::store::CredentialStore;
use super::token::{IssuedToken, issue_token};
use super::types::{StoredChallenge, StoredCredential, UserAccount};
use crate::protocol::{
    AuthenticatorSelection, PubKeyCredParam, RegistrationOptions, RegistrationVerifyRequest,
    RelyingPartyInfo, UserEntity,
};
use crate::utils::gen_random_string;
use chrono::Utc;

/// Answers the existence check: has this username completed a registration?
pub async fn username_exists(username: &str) -> Result<bool, RelyingPartyError> {
    if username.is_empty() {
        return Err(RelyingPartyError::Format("Username is required".to_string()));
    }
    CredentialStore::username_exists(username).await
}

/// Starts a registration ceremony: mints a fresh challenge and user id for
/// the username and returns the credential-creation options.
///
/// An already-taken username is refused here, and refused again at
/// credential insertion for the case where two ceremonies for the same new
/// username raced past this check.
pub async fn start_registration(username: &str) -> Result<RegistrationOptions, RelyingPartyError> {
    if username.is_empty() {
        return Err(RelyingPartyError::Format("Username is required".to_string()));
    }

    if CredentialStore::username_exists(username).await? {
        return Err(RelyingPartyError::Registration(
            "Username already exists".to_string(),
        ));
    }

    let challenge = gen_random_string(32)?;
    let user_id = gen_random_string(16)?;

    put_challenge(
        REGISTRATION_CHALLENGE,
        StoredChallenge {
            challenge: challenge.clone(),
            user_id: user_id.clone(),
            username: username.to_string(),
            timestamp: unix_now(),
            ttl: *CHALLENGE_TTL,
        },
    )
    .await?;

    let options = RegistrationOptions {
        challenge,
        rp_id: RP_ID.to_string(),
        rp: RelyingPartyInfo {
            name: RP_NAME.to_string(),
            id: RP_ID.to_string(),
        },
        user: UserEntity {
            id: user_id,
            name: username.to_string(),
            display_name: username.to_string(),
        },
        pub_key_cred_params: vec![
            PubKeyCredParam {
                type_: "public-key".to_string(),
                alg: -7,
            },
            PubKeyCredParam {
                type_: "public-key".to_string(),
                alg: -257,
            },
        ],
        authenticator_selection: AuthenticatorSelection {
            authenticator_attachment: "platform".to_string(),
            resident_key: "required".to_string(),
            require_resident_key: true,
            user_verification: USER_VERIFICATION.to_string(),
        },
        timeout: (*CEREMONY_TIMEOUT) * 1000, // Convert seconds to milliseconds
        attestation: "none".to_string(),
    };

    tracing::debug!("Registration options: {:?}", options);

    Ok(options)
}

/// Finishes a registration ceremony: consumes the bound challenge, verifies
/// the attestation response, persists the account and credential, and issues
/// a bearer token for the new session.
pub async fn finish_registration(
    request: &RegistrationVerifyRequest,
) -> Result<IssuedToken, RelyingPartyError> {
    tracing::debug!("finish_registration for username: {}", request.username);

    // The challenge is consumed up front; a retry must start a new ceremony.
    let stored = take_challenge(REGISTRATION_CHALLENGE, &request.challenge).await?;

    if stored.username != request.username {
        return Err(RelyingPartyError::Registration(
            "Username does not match the pending ceremony".to_string(),
        ));
    }

    if stored.user_id != request.user_id {
        return Err(RelyingPartyError::Registration(
            "User id does not match the pending ceremony".to_string(),
        ));
    }

    if request.credential.type_ != "public-key" {
        return Err(RelyingPartyError::ClientData(format!(
            "Invalid credential type: {}",
            request.credential.type_
        )));
    }

    let client_data =
        super::types::ParsedClientData::from_base64(&request.credential.response.client_data_json)?;
    client_data.verify(&stored.challenge, "webauthn.create")?;

    let attestation = parse_attestation_object(&request.credential.response.attestation_object)?;
    let attested = verify_attestation(&attestation)?;

    if attested.credential_id != request.credential.raw_id {
        return Err(RelyingPartyError::Verification(
            "Attested credential id does not match rawId".to_string(),
        ));
    }

    let sign_count = u32::from_be_bytes(
        attestation.auth_data[33..37]
            .try_into()
            .map_err(|_| RelyingPartyError::Format("Authenticator data too short".to_string()))?,
    );

    let now = Utc::now();
    let user = UserAccount {
        id: stored.user_id.clone(),
        username: stored.username.clone(),
        created_at: now,
    };
    let credential = StoredCredential {
        credential_id: attested.credential_id,
        user_id: stored.user_id.clone(),
        public_key: attested.public_key,
        counter: sign_count,
        user_handle: stored.user_id.clone(),
        created_at: now,
        last_used_at: now,
    };

    // The UNIQUE constraint on username settles the duplicate-registration
    // race: whichever ceremony lands second is refused here.
    CredentialStore::create_user_with_credential(&user, &credential).await?;

    tracing::info!("Registered new credential for username: {}", user.username);

    issue_token(&user.id, &user.username).await
}
