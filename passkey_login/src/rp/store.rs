use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row, Sqlite};

use super::errors::RelyingPartyError;
use super::types::{StoredCredential, UserAccount};
use crate::storage::GENERIC_DATA_STORE;

const USERS_TABLE: &str = "login_users";
const CREDENTIALS_TABLE: &str = "login_credentials";

/// Persistence for accounts and their passkey credentials.
pub(crate) struct CredentialStore;

impl CredentialStore {
    pub(crate) async fn init() -> Result<(), RelyingPartyError> {
        let store = GENERIC_DATA_STORE.lock().await;

        if let Some(pool) = store.as_sqlite() {
            create_tables_sqlite(pool).await
        } else if let Some(pool) = store.as_postgres() {
            create_tables_postgres(pool).await
        } else {
            Err(RelyingPartyError::Storage("Unsupported database type".into()))
        }
    }

    pub(crate) async fn username_exists(username: &str) -> Result<bool, RelyingPartyError> {
        Ok(Self::get_user_by_username(username).await?.is_some())
    }

    pub(crate) async fn get_user_by_username(
        username: &str,
    ) -> Result<Option<UserAccount>, RelyingPartyError> {
        let store = GENERIC_DATA_STORE.lock().await;

        if let Some(pool) = store.as_sqlite() {
            get_user_by_username_sqlite(pool, username).await
        } else if let Some(pool) = store.as_postgres() {
            get_user_by_username_postgres(pool, username).await
        } else {
            Err(RelyingPartyError::Storage("Unsupported database type".into()))
        }
    }

    /// Inserts the account and its first credential as one transaction, so a
    /// half-registered user can never be observed. The UNIQUE constraint on
    /// username turns a lost registration race into a Registration error.
    pub(crate) async fn create_user_with_credential(
        user: &UserAccount,
        credential: &StoredCredential,
    ) -> Result<(), RelyingPartyError> {
        let store = GENERIC_DATA_STORE.lock().await;

        if let Some(pool) = store.as_sqlite() {
            create_user_with_credential_sqlite(pool, user, credential).await
        } else if let Some(pool) = store.as_postgres() {
            create_user_with_credential_postgres(pool, user, credential).await
        } else {
            Err(RelyingPartyError::Storage("Unsupported database type".into()))
        }
    }

    pub(crate) async fn get_credential(
        credential_id: &str,
    ) -> Result<Option<StoredCredential>, RelyingPartyError> {
        let store = GENERIC_DATA_STORE.lock().await;

        if let Some(pool) = store.as_sqlite() {
            get_credential_sqlite(pool, credential_id).await
        } else if let Some(pool) = store.as_postgres() {
            get_credential_postgres(pool, credential_id).await
        } else {
            Err(RelyingPartyError::Storage("Unsupported database type".into()))
        }
    }

    pub(crate) async fn credential_ids_for_user(
        user_id: &str,
    ) -> Result<Vec<String>, RelyingPartyError> {
        let store = GENERIC_DATA_STORE.lock().await;

        if let Some(pool) = store.as_sqlite() {
            credential_ids_for_user_sqlite(pool, user_id).await
        } else if let Some(pool) = store.as_postgres() {
            credential_ids_for_user_postgres(pool, user_id).await
        } else {
            Err(RelyingPartyError::Storage("Unsupported database type".into()))
        }
    }

    pub(crate) async fn update_credential_counter(
        credential_id: &str,
        counter: u32,
    ) -> Result<(), RelyingPartyError> {
        let store = GENERIC_DATA_STORE.lock().await;

        if let Some(pool) = store.as_sqlite() {
            update_credential_counter_sqlite(pool, credential_id, counter).await
        } else if let Some(pool) = store.as_postgres() {
            update_credential_counter_postgres(pool, credential_id, counter).await
        } else {
            Err(RelyingPartyError::Storage("Unsupported database type".into()))
        }
    }

    pub(crate) async fn touch_credential(credential_id: &str) -> Result<(), RelyingPartyError> {
        let store = GENERIC_DATA_STORE.lock().await;

        if let Some(pool) = store.as_sqlite() {
            touch_credential_sqlite(pool, credential_id).await
        } else if let Some(pool) = store.as_postgres() {
            touch_credential_postgres(pool, credential_id).await
        } else {
            Err(RelyingPartyError::Storage("Unsupported database type".into()))
        }
    }
}

fn map_insert_error(e: sqlx::Error) -> RelyingPartyError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RelyingPartyError::Registration("Username already exists".to_string())
        }
        _ => RelyingPartyError::Storage(e.to_string()),
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<UserAccount, RelyingPartyError> {
    Ok(UserAccount {
        id: row
            .try_get("id")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        username: row
            .try_get("username")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
    })
}

fn pg_row_to_user(row: &sqlx::postgres::PgRow) -> Result<UserAccount, RelyingPartyError> {
    Ok(UserAccount {
        id: row
            .try_get("id")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        username: row
            .try_get("username")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
    })
}

fn row_to_credential(row: &sqlx::sqlite::SqliteRow) -> Result<StoredCredential, RelyingPartyError> {
    let counter: i64 = row
        .try_get("counter")
        .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;
    Ok(StoredCredential {
        credential_id: row
            .try_get("credential_id")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        public_key: row
            .try_get("public_key")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        counter: counter as u32,
        user_handle: row
            .try_get("user_handle")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        last_used_at: row
            .try_get("last_used_at")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
    })
}

fn pg_row_to_credential(
    row: &sqlx::postgres::PgRow,
) -> Result<StoredCredential, RelyingPartyError> {
    let counter: i64 = row
        .try_get("counter")
        .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;
    Ok(StoredCredential {
        credential_id: row
            .try_get("credential_id")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        public_key: row
            .try_get("public_key")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        counter: counter as u32,
        user_handle: row
            .try_get("user_handle")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
        last_used_at: row
            .try_get("last_used_at")
            .map_err(|e| RelyingPartyError::Storage(e.to_string()))?,
    })
}

// SQLite implementations

async fn create_tables_sqlite(pool: &Pool<Sqlite>) -> Result<(), RelyingPartyError> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {USERS_TABLE} (
            id TEXT PRIMARY KEY NOT NULL,
            username TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#
    ))
    .execute(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {CREDENTIALS_TABLE} (
            credential_id TEXT PRIMARY KEY NOT NULL,
            user_id TEXT NOT NULL REFERENCES {USERS_TABLE}(id),
            public_key TEXT NOT NULL,
            counter INTEGER NOT NULL DEFAULT 0,
            user_handle TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            last_used_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES {USERS_TABLE}(id)
        )
        "#
    ))
    .execute(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{CREDENTIALS_TABLE}_user_id ON {CREDENTIALS_TABLE}(user_id)"
    ))
    .execute(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    Ok(())
}

async fn get_user_by_username_sqlite(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<UserAccount>, RelyingPartyError> {
    let row = sqlx::query(&format!(
        "SELECT id, username, created_at FROM {USERS_TABLE} WHERE username = ?"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    row.as_ref().map(row_to_user).transpose()
}

async fn create_user_with_credential_sqlite(
    pool: &Pool<Sqlite>,
    user: &UserAccount,
    credential: &StoredCredential,
) -> Result<(), RelyingPartyError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    sqlx::query(&format!(
        "INSERT INTO {USERS_TABLE} (id, username, created_at) VALUES (?, ?, ?)"
    ))
    .bind(&user.id)
    .bind(&user.username)
    .bind(user.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_insert_error)?;

    sqlx::query(&format!(
        r#"
        INSERT INTO {CREDENTIALS_TABLE}
        (credential_id, user_id, public_key, counter, user_handle, created_at, last_used_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#
    ))
    .bind(&credential.credential_id)
    .bind(&credential.user_id)
    .bind(&credential.public_key)
    .bind(credential.counter as i64)
    .bind(&credential.user_handle)
    .bind(credential.created_at)
    .bind(credential.last_used_at)
    .execute(&mut *tx)
    .await
    .map_err(map_insert_error)?;

    tx.commit()
        .await
        .map_err(|e| RelyingPartyError::Storage(e.to_string()))
}

async fn get_credential_sqlite(
    pool: &Pool<Sqlite>,
    credential_id: &str,
) -> Result<Option<StoredCredential>, RelyingPartyError> {
    let row = sqlx::query(&format!(
        r#"
        SELECT credential_id, user_id, public_key, counter, user_handle, created_at, last_used_at
        FROM {CREDENTIALS_TABLE} WHERE credential_id = ?
        "#
    ))
    .bind(credential_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    row.as_ref().map(row_to_credential).transpose()
}

async fn credential_ids_for_user_sqlite(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<Vec<String>, RelyingPartyError> {
    let rows = sqlx::query(&format!(
        "SELECT credential_id FROM {CREDENTIALS_TABLE} WHERE user_id = ?"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    rows.iter()
        .map(|row| {
            row.try_get("credential_id")
                .map_err(|e| RelyingPartyError::Storage(e.to_string()))
        })
        .collect()
}

async fn update_credential_counter_sqlite(
    pool: &Pool<Sqlite>,
    credential_id: &str,
    counter: u32,
) -> Result<(), RelyingPartyError> {
    sqlx::query(&format!(
        "UPDATE {CREDENTIALS_TABLE} SET counter = ?, last_used_at = ? WHERE credential_id = ?"
    ))
    .bind(counter as i64)
    .bind(Utc::now())
    .bind(credential_id)
    .execute(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    Ok(())
}

async fn touch_credential_sqlite(
    pool: &Pool<Sqlite>,
    credential_id: &str,
) -> Result<(), RelyingPartyError> {
    sqlx::query(&format!(
        "UPDATE {CREDENTIALS_TABLE} SET last_used_at = ? WHERE credential_id = ?"
    ))
    .bind(Utc::now())
    .bind(credential_id)
    .execute(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    Ok(())
}

// Postgres implementations

async fn create_tables_postgres(pool: &Pool<Postgres>) -> Result<(), RelyingPartyError> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {USERS_TABLE} (
            id TEXT PRIMARY KEY NOT NULL,
            username TEXT NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#
    ))
    .execute(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {CREDENTIALS_TABLE} (
            credential_id TEXT PRIMARY KEY NOT NULL,
            user_id TEXT NOT NULL REFERENCES {USERS_TABLE}(id),
            public_key TEXT NOT NULL,
            counter BIGINT NOT NULL DEFAULT 0,
            user_handle TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
            last_used_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#
    ))
    .execute(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{CREDENTIALS_TABLE}_user_id ON {CREDENTIALS_TABLE}(user_id)"
    ))
    .execute(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    Ok(())
}

async fn get_user_by_username_postgres(
    pool: &Pool<Postgres>,
    username: &str,
) -> Result<Option<UserAccount>, RelyingPartyError> {
    let row = sqlx::query(&format!(
        "SELECT id, username, created_at FROM {USERS_TABLE} WHERE username = $1"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    row.as_ref().map(pg_row_to_user).transpose()
}

async fn create_user_with_credential_postgres(
    pool: &Pool<Postgres>,
    user: &UserAccount,
    credential: &StoredCredential,
) -> Result<(), RelyingPartyError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    sqlx::query(&format!(
        "INSERT INTO {USERS_TABLE} (id, username, created_at) VALUES ($1, $2, $3)"
    ))
    .bind(&user.id)
    .bind(&user.username)
    .bind(user.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_insert_error)?;

    sqlx::query(&format!(
        r#"
        INSERT INTO {CREDENTIALS_TABLE}
        (credential_id, user_id, public_key, counter, user_handle, created_at, last_used_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#
    ))
    .bind(&credential.credential_id)
    .bind(&credential.user_id)
    .bind(&credential.public_key)
    .bind(credential.counter as i64)
    .bind(&credential.user_handle)
    .bind(credential.created_at)
    .bind(credential.last_used_at)
    .execute(&mut *tx)
    .await
    .map_err(map_insert_error)?;

    tx.commit()
        .await
        .map_err(|e| RelyingPartyError::Storage(e.to_string()))
}

async fn get_credential_postgres(
    pool: &Pool<Postgres>,
    credential_id: &str,
) -> Result<Option<StoredCredential>, RelyingPartyError> {
    let row = sqlx::query(&format!(
        r#"
        SELECT credential_id, user_id, public_key, counter, user_handle, created_at, last_used_at
        FROM {CREDENTIALS_TABLE} WHERE credential_id = $1
        "#
    ))
    .bind(credential_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    row.as_ref().map(pg_row_to_credential).transpose()
}

async fn credential_ids_for_user_postgres(
    pool: &Pool<Postgres>,
    user_id: &str,
) -> Result<Vec<String>, RelyingPartyError> {
    let rows = sqlx::query(&format!(
        "SELECT credential_id FROM {CREDENTIALS_TABLE} WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    rows.iter()
        .map(|row| {
            row.try_get("credential_id")
                .map_err(|e| RelyingPartyError::Storage(e.to_string()))
        })
        .collect()
}

async fn update_credential_counter_postgres(
    pool: &Pool<Postgres>,
    credential_id: &str,
    counter: u32,
) -> Result<(), RelyingPartyError> {
    sqlx::query(&format!(
        "UPDATE {CREDENTIALS_TABLE} SET counter = $1, last_used_at = $2 WHERE credential_id = $3"
    ))
    .bind(counter as i64)
    .bind(Utc::now())
    .bind(credential_id)
    .execute(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    Ok(())
}

async fn touch_credential_postgres(
    pool: &Pool<Postgres>,
    credential_id: &str,
) -> Result<(), RelyingPartyError> {
    sqlx::query(&format!(
        "UPDATE {CREDENTIALS_TABLE} SET last_used_at = $1 WHERE credential_id = $2"
    ))
    .bind(Utc::now())
    .bind(credential_id)
    .execute(pool)
    .await
    .map_err(|e| RelyingPartyError::Storage(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_environment, init_test_stores, unique_username};
    use crate::utils::base64url_encode;
    use serial_test::serial;

    fn make_user(username: &str) -> UserAccount {
        UserAccount {
            id: format!("uid-{username}"),
            username: username.to_string(),
            created_at: Utc::now(),
        }
    }

    fn make_credential(credential_id: &str, user_id: &str) -> StoredCredential {
        StoredCredential {
            credential_id: credential_id.to_string(),
            user_id: user_id.to_string(),
            public_key: base64url_encode([0x04; 65]),
            counter: 0,
            user_handle: user_id.to_string(),
            created_at: Utc::now(),
            last_used_at: Utc::now(),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_create_and_lookup_user_with_credential() {
        init_test_environment();
        init_test_stores().await;

        let username = unique_username("store_lookup");
        let user = make_user(&username);
        let credential = make_credential(&format!("cred-{username}"), &user.id);

        CredentialStore::create_user_with_credential(&user, &credential)
            .await
            .unwrap();

        assert!(CredentialStore::username_exists(&username).await.unwrap());

        let loaded = CredentialStore::get_user_by_username(&username)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, user.id);

        let stored = CredentialStore::get_credential(&credential.credential_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_id, user.id);
        assert_eq!(stored.public_key, credential.public_key);

        let ids = CredentialStore::credential_ids_for_user(&user.id)
            .await
            .unwrap();
        assert_eq!(ids, vec![credential.credential_id]);
    }

    #[tokio::test]
    #[serial]
    async fn test_duplicate_username_is_refused() {
        init_test_environment();
        init_test_stores().await;

        let username = unique_username("store_dup");
        let first = make_user(&username);
        CredentialStore::create_user_with_credential(
            &first,
            &make_credential(&format!("cred1-{username}"), &first.id),
        )
        .await
        .unwrap();

        let mut second = make_user(&username);
        second.id = format!("other-{username}");
        let result = CredentialStore::create_user_with_credential(
            &second,
            &make_credential(&format!("cred2-{username}"), &second.id),
        )
        .await;

        match result {
            Err(RelyingPartyError::Registration(msg)) => {
                assert!(msg.contains("already exists"));
            }
            other => panic!("Expected Registration error, got {other:?}"),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_counter_update() {
        init_test_environment();
        init_test_stores().await;

        let username = unique_username("store_counter");
        let user = make_user(&username);
        let credential = make_credential(&format!("cred-{username}"), &user.id);

        CredentialStore::create_user_with_credential(&user, &credential)
            .await
            .unwrap();

        CredentialStore::update_credential_counter(&credential.credential_id, 42)
            .await
            .unwrap();

        let stored = CredentialStore::get_credential(&credential.credential_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.counter, 42);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_user_and_credential() {
        init_test_environment();
        init_test_stores().await;

        assert!(
            CredentialStore::get_user_by_username("missing-user")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            CredentialStore::get_credential("missing-credential")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            CredentialStore::credential_ids_for_user("missing-user")
                .await
                .unwrap()
                .is_empty()
        );
    }
}
