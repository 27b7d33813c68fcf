use std::{env, sync::LazyLock};

pub(super) static ORIGIN: LazyLock<String> =
    LazyLock::new(|| std::env::var("ORIGIN").expect("ORIGIN must be set"));

pub(super) static RP_ID: LazyLock<String> = LazyLock::new(|| {
    ORIGIN
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split(':')
        .next()
        .map(|s| s.to_string())
        .expect("Could not extract RP ID from ORIGIN")
});

pub(super) static RP_NAME: LazyLock<String> =
    LazyLock::new(|| env::var("RP_NAME").ok().unwrap_or(ORIGIN.clone()));

/// Ceremony timeout handed to the authenticator, in seconds.
pub(super) static CEREMONY_TIMEOUT: LazyLock<u32> = LazyLock::new(|| {
    env::var("AUTH_CEREMONY_TIMEOUT")
        .map(|v| v.parse::<u32>().unwrap_or(60))
        .unwrap_or(60)
});

/// How long an issued challenge stays redeemable, in seconds.
pub(super) static CHALLENGE_TTL: LazyLock<u64> = LazyLock::new(|| {
    env::var("AUTH_CHALLENGE_TTL")
        .map(|v| v.parse::<u64>().unwrap_or(60))
        .unwrap_or(60)
});

/// Lifetime of an issued bearer token, in seconds.
pub(super) static TOKEN_TTL: LazyLock<u64> = LazyLock::new(|| {
    env::var("AUTH_TOKEN_TTL")
        .map(|v| v.parse::<u64>().unwrap_or(3600))
        .unwrap_or(3600)
});

pub(super) static USER_VERIFICATION: LazyLock<String> = LazyLock::new(|| {
    env::var("AUTH_USER_VERIFICATION").map_or("preferred".to_string(), |v| {
        match v.to_lowercase().as_str() {
            "required" => "required".to_string(),
            "preferred" => "preferred".to_string(),
            "discouraged" => "discouraged".to_string(),
            _ => {
                tracing::warn!("Invalid user verification: {}. Using default 'preferred'", v);
                "preferred".to_string()
            }
        }
    })
});
