use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::config::TOKEN_TTL;
use super::errors::RelyingPartyError;
use crate::storage::{CacheData, GENERIC_CACHE_STORE};
use crate::utils::gen_random_string;

const TOKEN_PREFIX: &str = "session";

/// A bearer token freshly issued for a verified ceremony, together with the
/// identity it authenticates.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    user_id: String,
    username: String,
    expires_at: DateTime<Utc>,
    ttl: u64,
}

impl From<StoredToken> for CacheData {
    fn from(data: StoredToken) -> Self {
        Self {
            value: serde_json::to_string(&data).expect("Failed to serialize StoredToken"),
        }
    }
}

impl TryFrom<CacheData> for StoredToken {
    type Error = RelyingPartyError;

    fn try_from(data: CacheData) -> Result<Self, Self::Error> {
        serde_json::from_str(&data.value).map_err(|e| RelyingPartyError::Storage(e.to_string()))
    }
}

/// Issues a new bearer token for a verified user.
pub async fn issue_token(user_id: &str, username: &str) -> Result<IssuedToken, RelyingPartyError> {
    let token = gen_random_string(32)?;
    let ttl = *TOKEN_TTL;

    let stored = StoredToken {
        user_id: user_id.to_string(),
        username: username.to_string(),
        expires_at: Utc::now() + Duration::seconds(ttl as i64),
        ttl,
    };

    GENERIC_CACHE_STORE
        .lock()
        .await
        .put_with_ttl(TOKEN_PREFIX, &token, stored.into(), ttl as usize)
        .await?;

    tracing::debug!("Issued token for username: {}", username);

    Ok(IssuedToken {
        token,
        identity: username.to_string(),
    })
}

/// Verifies a presented bearer token. Returns the identity it belongs to, or
/// None for unknown and expired tokens.
pub async fn verify_token(token: &str) -> Result<Option<String>, RelyingPartyError> {
    if token.is_empty() {
        return Ok(None);
    }

    let data = GENERIC_CACHE_STORE
        .lock()
        .await
        .get(TOKEN_PREFIX, token)
        .await?;

    let Some(data) = data else {
        return Ok(None);
    };

    let stored: StoredToken = data.try_into()?;

    if stored.expires_at < Utc::now() {
        tracing::debug!("Token expired at {}", stored.expires_at);
        GENERIC_CACHE_STORE
            .lock()
            .await
            .remove(TOKEN_PREFIX, token)
            .await?;
        return Ok(None);
    }

    Ok(Some(stored.username))
}

/// Revokes a bearer token. Revoking an unknown token is not an error.
pub async fn revoke_token(token: &str) -> Result<(), RelyingPartyError> {
    GENERIC_CACHE_STORE
        .lock()
        .await
        .remove(TOKEN_PREFIX, token)
        .await?;
    tracing::debug!("Revoked token");
    Ok(())
}
