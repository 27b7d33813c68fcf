use std::time::SystemTime;

use super::config::CHALLENGE_TTL;
use super::errors::RelyingPartyError;
use super::types::StoredChallenge;
use crate::storage::GENERIC_CACHE_STORE;

pub(super) const REGISTRATION_CHALLENGE: &str = "regi_challenge";
pub(super) const ASSERTION_CHALLENGE: &str = "auth_challenge";

pub(super) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Stores a pending ceremony keyed by its challenge text.
pub(super) async fn put_challenge(
    challenge_type: &str,
    stored: StoredChallenge,
) -> Result<(), RelyingPartyError> {
    let key = stored.challenge.clone();
    let ttl = stored.ttl as usize;
    GENERIC_CACHE_STORE
        .lock()
        .await
        .put_with_ttl(challenge_type, &key, stored.into(), ttl)
        .await?;

    tracing::debug!("Stored {} challenge {}", challenge_type, key);
    Ok(())
}

/// Removes and returns a pending ceremony.
///
/// The removal happens before any validation so a challenge can never be
/// presented twice, not even by interleaved verify calls: the first caller
/// takes it, everyone else gets NotFound.
pub(super) async fn take_challenge(
    challenge_type: &str,
    challenge: &str,
) -> Result<StoredChallenge, RelyingPartyError> {
    let data = GENERIC_CACHE_STORE
        .lock()
        .await
        .take(challenge_type, challenge)
        .await?
        .ok_or(RelyingPartyError::NotFound(
            "Challenge not found".to_string(),
        ))?;

    let stored: StoredChallenge = data.try_into()?;

    let age = unix_now().saturating_sub(stored.timestamp);
    let timeout = stored.ttl.min(*CHALLENGE_TTL);
    if age > timeout {
        tracing::warn!(
            "Challenge expired after {} seconds (timeout: {})",
            age,
            timeout
        );
        return Err(RelyingPartyError::Challenge(
            "Challenge has expired".into(),
        ));
    }

    tracing::debug!("Consumed {} challenge {}", challenge_type, challenge);
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_environment;

    fn make_stored(challenge: &str, age_secs: u64, ttl: u64) -> StoredChallenge {
        StoredChallenge {
            challenge: challenge.to_string(),
            user_id: "user-1".to_string(),
            username: "alice".to_string(),
            timestamp: unix_now() - age_secs,
            ttl,
        }
    }

    #[tokio::test]
    async fn test_challenge_roundtrip() {
        init_test_environment();

        let stored = make_stored("rt_challenge", 0, 300);
        put_challenge("test_challenge", stored.clone()).await.unwrap();

        let taken = take_challenge("test_challenge", "rt_challenge").await.unwrap();
        assert_eq!(taken.challenge, stored.challenge);
        assert_eq!(taken.user_id, stored.user_id);
        assert_eq!(taken.username, stored.username);
    }

    #[tokio::test]
    async fn test_challenge_is_single_use() {
        init_test_environment();

        put_challenge("test_challenge", make_stored("one_shot", 0, 300))
            .await
            .unwrap();

        assert!(take_challenge("test_challenge", "one_shot").await.is_ok());

        match take_challenge("test_challenge", "one_shot").await {
            Err(RelyingPartyError::NotFound(msg)) => {
                assert_eq!(msg, "Challenge not found");
            }
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_take_missing_challenge() {
        init_test_environment();

        match take_challenge("test_challenge", "never_stored").await {
            Err(RelyingPartyError::NotFound(_)) => {}
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_challenge_rejected() {
        init_test_environment();

        // Stored 400 seconds ago with a 300-second ttl
        put_challenge("test_challenge", make_stored("stale", 400, 300))
            .await
            .unwrap();

        match take_challenge("test_challenge", "stale").await {
            Err(RelyingPartyError::Challenge(msg)) => {
                assert!(msg.contains("expired"));
            }
            other => panic!("Expected Challenge error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_challenge_consumed_even_on_rejection() {
        init_test_environment();

        put_challenge("test_challenge", make_stored("stale_once", 400, 300))
            .await
            .unwrap();

        assert!(take_challenge("test_challenge", "stale_once").await.is_err());

        // The failed take still consumed it
        match take_challenge("test_challenge", "stale_once").await {
            Err(RelyingPartyError::NotFound(_)) => {}
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_long_ttl_clamped_to_configured_timeout() {
        init_test_environment();

        // Older than AUTH_CHALLENGE_TTL but with a huge stored ttl
        let stored = make_stored("clamped", *CHALLENGE_TTL + 10, 86400);
        put_challenge("test_challenge", stored).await.unwrap();

        match take_challenge("test_challenge", "clamped").await {
            Err(RelyingPartyError::Challenge(msg)) => {
                assert!(msg.contains("expired"));
            }
            other => panic!("Expected Challenge error, got {other:?}"),
        }
    }
}
