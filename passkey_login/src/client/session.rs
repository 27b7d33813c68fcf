use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::api::AuthApi;
use super::errors::AuthError;
use super::types::{PersistedSession, Session};

/// Durable storage for the one session record.
///
/// `save` and `clear` replace the whole record in a single step; there is no
/// way to persist a token without its identity or vice versa.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedSession>, AuthError>;
    async fn save(&self, record: &PersistedSession) -> Result<(), AuthError>;
    async fn clear(&self) -> Result<(), AuthError>;
}

/// In-memory store: one mutex-guarded slot.
#[derive(Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<PersistedSession>, AuthError> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, record: &PersistedSession) -> Result<(), AuthError> {
        *self.slot.lock().await = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        *self.slot.lock().await = None;
        Ok(())
    }
}

/// File-backed store. Writes go to a sibling temp file first and are moved
/// into place with a rename, so a reader sees either the old record or the
/// new one, never a torn write.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut path = self.path.clone();
        path.set_extension("tmp");
        path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<PersistedSession>, AuthError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::SessionStore(e.to_string())),
        };

        match serde_json::from_str(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // An unreadable record is useless; drop it rather than keep
                // failing every load.
                tracing::warn!("Discarding corrupt session record: {}", e);
                self.clear().await?;
                Ok(None)
            }
        }
    }

    async fn save(&self, record: &PersistedSession) -> Result<(), AuthError> {
        let serialized = serde_json::to_string(record)
            .map_err(|e| AuthError::SessionStore(e.to_string()))?;

        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, serialized)
            .await
            .map_err(|e| AuthError::SessionStore(e.to_string()))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| AuthError::SessionStore(e.to_string()))?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::SessionStore(e.to_string())),
        }
    }
}

/// Owns the client's notion of "am I authenticated".
///
/// The persisted record is never authoritative by itself: `restore` always
/// round-trips to the server before reporting a session as live.
pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn SessionStore>) -> Self {
        Self { api, store }
    }

    /// Persists a freshly issued token and identity as one record.
    pub async fn commit(&self, token: String, identity: String) -> Result<Session, AuthError> {
        let session = Session {
            token,
            identity,
            established_at: Utc::now(),
        };

        self.store.save(&PersistedSession::from(&session)).await?;
        tracing::debug!("Committed session for identity: {}", session.identity);

        Ok(session)
    }

    /// Loads the persisted record, if any, and re-validates it server-side.
    ///
    /// A rejected token is cleared and `None` is returned; a transport
    /// failure surfaces as an error and the record stays put, unconfirmed.
    pub async fn restore(&self) -> Result<Option<Session>, AuthError> {
        let Some(record) = self.store.load().await? else {
            return Ok(None);
        };

        if self.api.verify_session(&record.token).await? {
            tracing::debug!("Restored session for identity: {}", record.identity);
            Ok(Some(Session::from(record)))
        } else {
            tracing::debug!("Persisted session no longer valid; clearing");
            self.store.clear().await?;
            Ok(None)
        }
    }

    /// Gate for privileged actions: re-validates the persisted record and
    /// returns the live session, or `SessionExpired` when there is none.
    pub async fn require_live(&self) -> Result<Session, AuthError> {
        self.restore().await?.ok_or(AuthError::SessionExpired)
    }

    /// Logs out: best-effort server invalidation, then local clear. A server
    /// that cannot be reached does not block the local clear.
    pub async fn clear(&self) -> Result<(), AuthError> {
        if let Some(record) = self.store.load().await? {
            if let Err(e) = self.api.logout(&record.token).await {
                tracing::warn!("Server-side logout failed: {}", e);
            }
        }

        self.store.clear().await
    }
}
