//! Scriptable doubles for the server boundary and the platform
//! authenticator, shared by the client-side tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::api::AuthApi;
use super::authenticator::{AuthenticatorError, PlatformAuthenticator};
use super::errors::AuthError;
use super::types::{
    AssertedCredential, CreatedCredential, CredentialAssertionOptions, CredentialCreationOptions,
    VerificationOutcome,
};
use crate::protocol::{
    AllowCredential, AssertionOptions, AssertionVerifyRequest, AuthenticatorSelection,
    PubKeyCredParam, RegistrationOptions, RegistrationVerifyRequest, RelyingPartyInfo, UserEntity,
};
use crate::utils::base64url_encode;

pub(crate) struct MockAuthApi {
    registered: Mutex<HashSet<String>>,
    calls: Mutex<Vec<&'static str>>,
    challenge_counter: AtomicU32,
    token_counter: AtomicU32,
    fail_exists: AtomicBool,
    reject_verify: AtomicBool,
    session_valid: AtomicBool,
    fail_session_verify: AtomicBool,
    fail_logout: AtomicBool,
    malformed_challenge: AtomicBool,
    pub(crate) registration_requests: Mutex<Vec<RegistrationVerifyRequest>>,
    pub(crate) assertion_requests: Mutex<Vec<AssertionVerifyRequest>>,
}

impl MockAuthApi {
    pub(crate) fn new() -> Self {
        Self {
            registered: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            challenge_counter: AtomicU32::new(0),
            token_counter: AtomicU32::new(0),
            fail_exists: AtomicBool::new(false),
            reject_verify: AtomicBool::new(false),
            session_valid: AtomicBool::new(true),
            fail_session_verify: AtomicBool::new(false),
            fail_logout: AtomicBool::new(false),
            malformed_challenge: AtomicBool::new(false),
            registration_requests: Mutex::new(Vec::new()),
            assertion_requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_registered(&self, username: &str) {
        self.registered.lock().unwrap().insert(username.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn set_fail_exists(&self, fail: bool) {
        self.fail_exists.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_reject_verify(&self, reject: bool) {
        self.reject_verify.store(reject, Ordering::SeqCst);
    }

    pub(crate) fn set_session_valid(&self, valid: bool) {
        self.session_valid.store(valid, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_session_verify(&self, fail: bool) {
        self.fail_session_verify.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_logout(&self, fail: bool) {
        self.fail_logout.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_malformed_challenge(&self, malformed: bool) {
        self.malformed_challenge.store(malformed, Ordering::SeqCst);
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_challenge(&self) -> String {
        if self.malformed_challenge.load(Ordering::SeqCst) {
            return "!!!not-codec-text!!!".to_string();
        }
        let n = self.challenge_counter.fetch_add(1, Ordering::SeqCst) + 1;
        base64url_encode(format!("challenge-{n}"))
    }

    fn next_token(&self) -> String {
        let n = self.token_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("token-{n}")
    }
}

#[async_trait]
impl AuthApi for MockAuthApi {
    async fn exists(&self, username: &str) -> Result<bool, AuthError> {
        self.record("exists");
        if self.fail_exists.load(Ordering::SeqCst) {
            return Err(AuthError::Network("existence check unavailable".to_string()));
        }
        Ok(self.registered.lock().unwrap().contains(username))
    }

    async fn registration_options(
        &self,
        username: &str,
    ) -> Result<RegistrationOptions, AuthError> {
        self.record("registration_options");
        Ok(RegistrationOptions {
            challenge: self.next_challenge(),
            rp_id: "localhost".to_string(),
            rp: RelyingPartyInfo {
                name: "Mock RP".to_string(),
                id: "localhost".to_string(),
            },
            user: UserEntity {
                id: base64url_encode(format!("user-{username}")),
                name: username.to_string(),
                display_name: username.to_string(),
            },
            pub_key_cred_params: vec![PubKeyCredParam {
                type_: "public-key".to_string(),
                alg: -7,
            }],
            authenticator_selection: AuthenticatorSelection {
                authenticator_attachment: "platform".to_string(),
                resident_key: "required".to_string(),
                require_resident_key: true,
                user_verification: "preferred".to_string(),
            },
            timeout: 60000,
            attestation: "none".to_string(),
        })
    }

    async fn verify_registration(
        &self,
        request: &RegistrationVerifyRequest,
    ) -> Result<VerificationOutcome, AuthError> {
        self.record("verify_registration");
        self.registration_requests
            .lock()
            .unwrap()
            .push(request.clone());

        if self.reject_verify.load(Ordering::SeqCst) {
            return Ok(VerificationOutcome::Failure {
                reason: "Username already exists".to_string(),
            });
        }

        self.add_registered(&request.username);
        Ok(VerificationOutcome::Success {
            token: self.next_token(),
            identity: request.username.clone(),
        })
    }

    async fn assertion_options(&self, _username: &str) -> Result<AssertionOptions, AuthError> {
        self.record("assertion_options");
        Ok(AssertionOptions {
            challenge: self.next_challenge(),
            timeout: 60000,
            rp_id: "localhost".to_string(),
            allow_credentials: vec![AllowCredential {
                type_: "public-key".to_string(),
                id: base64url_encode("cred-1"),
            }],
            user_verification: "preferred".to_string(),
        })
    }

    async fn verify_assertion(
        &self,
        request: &AssertionVerifyRequest,
    ) -> Result<VerificationOutcome, AuthError> {
        self.record("verify_assertion");
        self.assertion_requests.lock().unwrap().push(request.clone());

        if self.reject_verify.load(Ordering::SeqCst) {
            return Ok(VerificationOutcome::Failure {
                reason: "Signature mismatch".to_string(),
            });
        }

        Ok(VerificationOutcome::Success {
            token: self.next_token(),
            identity: request.username.clone(),
        })
    }

    async fn verify_session(&self, _token: &str) -> Result<bool, AuthError> {
        self.record("verify_session");
        if self.fail_session_verify.load(Ordering::SeqCst) {
            return Err(AuthError::Network("session verify unavailable".to_string()));
        }
        Ok(self.session_valid.load(Ordering::SeqCst))
    }

    async fn logout(&self, _token: &str) -> Result<(), AuthError> {
        self.record("logout");
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(AuthError::Network("logout unavailable".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) enum MockBehavior {
    Succeed,
    Cancel,
    Fail(String),
    /// Never resolves; used to exercise external cancellation.
    Hang,
}

pub(crate) struct MockAuthenticator {
    pub(crate) create: MockBehavior,
    pub(crate) assert: MockBehavior,
}

impl Default for MockAuthenticator {
    fn default() -> Self {
        Self {
            create: MockBehavior::Succeed,
            assert: MockBehavior::Succeed,
        }
    }
}

#[async_trait]
impl PlatformAuthenticator for MockAuthenticator {
    async fn create_credential(
        &self,
        options: &CredentialCreationOptions,
    ) -> Result<CreatedCredential, AuthenticatorError> {
        match &self.create {
            MockBehavior::Succeed => Ok(CreatedCredential {
                id: "mock-cred".to_string(),
                raw_id: b"mock-cred".to_vec(),
                attestation_object: b"attestation".to_vec(),
                // Echo the challenge so tests can see what was signed over
                client_data_json: options.challenge.clone(),
            }),
            MockBehavior::Cancel => Err(AuthenticatorError::Cancelled),
            MockBehavior::Fail(msg) => Err(AuthenticatorError::Failed(msg.clone())),
            MockBehavior::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Err(AuthenticatorError::Failed("unreachable".to_string()))
            }
        }
    }

    async fn assert_credential(
        &self,
        options: &CredentialAssertionOptions,
    ) -> Result<AssertedCredential, AuthenticatorError> {
        match &self.assert {
            MockBehavior::Succeed => Ok(AssertedCredential {
                id: "mock-cred".to_string(),
                raw_id: b"mock-cred".to_vec(),
                authenticator_data: b"authdata".to_vec(),
                signature: b"signature".to_vec(),
                client_data_json: options.challenge.clone(),
                user_handle: None,
            }),
            MockBehavior::Cancel => Err(AuthenticatorError::Cancelled),
            MockBehavior::Fail(msg) => Err(AuthenticatorError::Failed(msg.clone())),
            MockBehavior::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Err(AuthenticatorError::Failed("unreachable".to_string()))
            }
        }
    }
}
