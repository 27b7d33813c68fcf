//! Shared test initialization and ceremony fixtures.
//!
//! `init_test_environment` loads `.env_test` (falling back to `.env`) once
//! and fills in defaults so unit tests run without any checked-in
//! configuration. Store-backed tests additionally call `init_test_stores`.

use std::sync::Once;
use std::sync::atomic::{AtomicU32, Ordering};

use ciborium::value::Value as CborValue;
use ring::digest;

pub(crate) fn init_test_environment() {
    static ENV_INIT: Once = Once::new();
    ENV_INIT.call_once(|| {
        if dotenvy::from_filename(".env_test").is_err() {
            dotenvy::dotenv().ok();
        }

        // Env manipulation affects global state; tests set these before any
        // LazyLock config is touched.
        unsafe {
            if std::env::var("ORIGIN").is_err() {
                std::env::set_var("ORIGIN", "http://localhost:5001");
            }
            if std::env::var("AUTH_DB_URL").is_err() {
                std::env::set_var("AUTH_DB_URL", "sqlite:test_login.db");
            }
            if std::env::var("AUTH_CACHE_STORE_TYPE").is_err() {
                std::env::set_var("AUTH_CACHE_STORE_TYPE", "memory");
            }
        }

        // Start from a clean database file per test run
        if let Ok(url) = std::env::var("AUTH_DB_URL") {
            if let Some(path) = url.strip_prefix("sqlite:") {
                let path = path.split('?').next().unwrap_or(path);
                if path != ":memory:" {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
    });
}

pub(crate) async fn init_test_stores() {
    init_test_environment();
    if let Err(e) = crate::rp::init().await {
        eprintln!("Warning: failed to initialize credential store: {e}");
    }
}

static USERNAME_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Usernames unique per test run, so store tests never collide.
pub(crate) fn unique_username(prefix: &str) -> String {
    let n = USERNAME_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}_{}_{n}", std::process::id())
}

/// Minimal authenticator data: rpIdHash (32) + flags (1) + counter (4).
pub(crate) fn build_auth_data(rp_id: &str, flags: u8, counter: u32) -> Vec<u8> {
    let mut data = Vec::new();
    let rp_id_hash = digest::digest(&digest::SHA256, rp_id.as_bytes());
    data.extend_from_slice(rp_id_hash.as_ref());
    data.push(flags);
    data.extend_from_slice(&counter.to_be_bytes());
    data
}

/// COSE EC2 P-256 key as a CBOR map with the given coordinates.
pub(crate) fn build_cose_p256_key(x: &[u8], y: &[u8]) -> Vec<u8> {
    let entries = vec![
        // kty: EC2 (2)
        (CborValue::Integer(1i64.into()), CborValue::Integer(2i64.into())),
        // alg: ES256 (-7)
        (
            CborValue::Integer(3i64.into()),
            CborValue::Integer((-7i64).into()),
        ),
        // crv: P-256 (1)
        (
            CborValue::Integer((-1i64).into()),
            CborValue::Integer(1i64.into()),
        ),
        (
            CborValue::Integer((-2i64).into()),
            CborValue::Bytes(x.to_vec()),
        ),
        (
            CborValue::Integer((-3i64).into()),
            CborValue::Bytes(y.to_vec()),
        ),
    ];

    let mut out = Vec::new();
    ciborium::ser::into_writer(&CborValue::Map(entries), &mut out)
        .expect("Failed to serialize COSE key");
    out
}

/// Authenticator data carrying attested credential data: the minimal header
/// plus AAGUID (16), credential id length (2), credential id, and COSE key.
pub(crate) fn build_attested_auth_data(
    rp_id: &str,
    flags: u8,
    counter: u32,
    cred_id: &[u8],
    cose_key: &[u8],
) -> Vec<u8> {
    let mut data = build_auth_data(rp_id, flags, counter);
    data.extend_from_slice(&[0u8; 16]); // AAGUID
    data.extend_from_slice(&(cred_id.len() as u16).to_be_bytes());
    data.extend_from_slice(cred_id);
    data.extend_from_slice(cose_key);
    data
}

/// A complete attestation object as codec-text, with UP | UV | AT flags set.
pub(crate) fn build_attestation_object(
    fmt: &str,
    empty_att_stmt: bool,
    rp_id: &str,
    cred_id: &[u8],
    cose_key: &[u8],
) -> String {
    let flags = 0x01 | 0x04 | 0x40;
    let auth_data = build_attested_auth_data(rp_id, flags, 0, cred_id, cose_key);

    let att_stmt = if empty_att_stmt {
        CborValue::Map(Vec::new())
    } else {
        CborValue::Map(vec![(
            CborValue::Text("alg".to_string()),
            CborValue::Integer(1i64.into()),
        )])
    };

    let map = CborValue::Map(vec![
        (
            CborValue::Text("fmt".to_string()),
            CborValue::Text(fmt.to_string()),
        ),
        (
            CborValue::Text("authData".to_string()),
            CborValue::Bytes(auth_data),
        ),
        (CborValue::Text("attStmt".to_string()), att_stmt),
    ]);

    let mut out = Vec::new();
    ciborium::ser::into_writer(&map, &mut out).expect("Failed to serialize attestation object");
    crate::utils::base64url_encode(out)
}
