//! SQLite storage for principals, pending logins, denied tokens, and the
//! blind entry store.
//!
//! The server persists password hashes, confirmed TOTP secrets, and opaque
//! encrypted blobs. It holds no plaintext credentials and no derived keys.

use crate::error::ApiError;
use chrono::Utc;
use keyward_core::store::{EntryStore, StoreError, StoredEntry};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Thread-safe server storage.
#[derive(Clone)]
pub struct ServerStorage {
    conn: Arc<Mutex<Connection>>,
}

/// One principal row. `totp_secret` is present only after the secret was
/// confirmed by a successful verification.
#[derive(Debug, Clone)]
pub struct PrincipalRow {
    pub principal_id: String,
    pub username: String,
    pub password_hash: String,
    pub totp_secret: Option<String>,
}

/// A live pending-login marker linking a password-verified attempt to its
/// unfinished MFA step.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub marker: String,
    pub principal_id: String,
    pub provisional_secret: Option<String>,
    pub expires_at: i64,
}

impl ServerStorage {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        // journal_mode reports the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS principals (
                principal_id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                totp_secret TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                principal_id TEXT NOT NULL,
                label TEXT NOT NULL,
                username TEXT NOT NULL,
                blob TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                modified_at INTEGER NOT NULL,
                UNIQUE (principal_id, label),
                FOREIGN KEY (principal_id) REFERENCES principals(principal_id)
            );

            CREATE TABLE IF NOT EXISTS pending_logins (
                marker TEXT PRIMARY KEY,
                principal_id TEXT NOT NULL,
                provisional_secret TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (principal_id) REFERENCES principals(principal_id)
            );

            CREATE TABLE IF NOT EXISTS denied_tokens (
                token TEXT PRIMARY KEY,
                denied_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_principal
                ON entries(principal_id);
            CREATE INDEX IF NOT EXISTS idx_pending_expires
                ON pending_logins(expires_at);
            CREATE INDEX IF NOT EXISTS idx_denied_expires
                ON denied_tokens(expires_at);",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.conn
            .lock()
            .map_err(|e| ApiError::Internal(format!("Lock error: {}", e)))
    }

    // ---- principals -----------------------------------------------------

    pub fn create_principal(&self, username: &str, password_hash: &str) -> Result<String, ApiError> {
        let conn = self.conn()?;
        let principal_id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO principals (principal_id, username, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![principal_id, username, password_hash, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ApiError::Conflict("Username already registered".to_string())
            }
            other => ApiError::Database(other.to_string()),
        })?;

        Ok(principal_id)
    }

    pub fn principal_by_username(&self, username: &str) -> Result<Option<PrincipalRow>, ApiError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT principal_id, username, password_hash, totp_secret
                 FROM principals WHERE username = ?1",
                [username],
                |row| {
                    Ok(PrincipalRow {
                        principal_id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        totp_secret: row.get(3)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(ApiError::Database(other.to_string())),
            })?;
        Ok(row)
    }

    pub fn principal_by_id(&self, principal_id: &str) -> Result<Option<PrincipalRow>, ApiError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT principal_id, username, password_hash, totp_secret
                 FROM principals WHERE principal_id = ?1",
                [principal_id],
                |row| {
                    Ok(PrincipalRow {
                        principal_id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        totp_secret: row.get(3)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(ApiError::Database(other.to_string())),
            })?;
        Ok(row)
    }

    /// Persist a TOTP secret after its first successful verification.
    /// Secrets never land here in a provisional state.
    pub fn confirm_totp_secret(&self, principal_id: &str, secret: &str) -> Result<(), ApiError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE principals SET totp_secret = ?1 WHERE principal_id = ?2",
            rusqlite::params![secret, principal_id],
        )?;
        if changed == 0 {
            return Err(ApiError::NotFound("Principal not found".to_string()));
        }
        Ok(())
    }

    // ---- pending logins -------------------------------------------------

    pub fn create_pending_login(
        &self,
        principal_id: &str,
        provisional_secret: Option<&str>,
        ttl_secs: i64,
    ) -> Result<PendingLogin, ApiError> {
        let conn = self.conn()?;
        let marker = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let expires_at = now + ttl_secs;

        conn.execute(
            "INSERT INTO pending_logins (marker, principal_id, provisional_secret, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![marker, principal_id, provisional_secret, now, expires_at],
        )?;

        Ok(PendingLogin {
            marker,
            principal_id: principal_id.to_string(),
            provisional_secret: provisional_secret.map(str::to_string),
            expires_at,
        })
    }

    /// Fetch a live marker: unexpired and not yet consumed.
    pub fn fetch_pending_login(&self, marker: &str) -> Result<Option<PendingLogin>, ApiError> {
        let conn = self.conn()?;
        let now = Utc::now().timestamp();
        let row = conn
            .query_row(
                "SELECT marker, principal_id, provisional_secret, expires_at
                 FROM pending_logins
                 WHERE marker = ?1 AND expires_at > ?2 AND consumed = 0",
                rusqlite::params![marker, now],
                |row| {
                    Ok(PendingLogin {
                        marker: row.get(0)?,
                        principal_id: row.get(1)?,
                        provisional_secret: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(ApiError::Database(other.to_string())),
            })?;
        Ok(row)
    }

    pub fn consume_pending_login(&self, marker: &str) -> Result<(), ApiError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE pending_logins SET consumed = 1 WHERE marker = ?1",
            [marker],
        )?;
        Ok(())
    }

    // ---- token deny list ------------------------------------------------

    pub fn deny_token(&self, token: &str, expires_at: i64) -> Result<(), ApiError> {
        let conn = self.conn()?;
        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT OR IGNORE INTO denied_tokens (token, denied_at, expires_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![token, now, expires_at],
        )?;
        Ok(())
    }

    pub fn is_token_denied(&self, token: &str) -> Result<bool, ApiError> {
        let conn = self.conn()?;
        let denied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM denied_tokens WHERE token = ?1)",
            [token],
            |row| row.get(0),
        )?;
        Ok(denied)
    }

    // ---- maintenance ----------------------------------------------------

    /// Prune expired pending logins (consumed or not) and deny-list rows
    /// whose tokens have passed their natural expiry.
    pub fn prune_expired(&self, now: i64) -> Result<(), ApiError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM pending_logins WHERE expires_at <= ?1 OR consumed = 1",
            [now],
        )?;
        conn.execute("DELETE FROM denied_tokens WHERE expires_at <= ?1", [now])?;
        Ok(())
    }
}

/// The blind entry store: opaque blobs in, opaque blobs out.
impl EntryStore for ServerStorage {
    fn get_all(&self, owner: &str) -> Result<Vec<StoredEntry>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT label, username, blob FROM entries
                 WHERE principal_id = ?1 ORDER BY entry_id",
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let entries = stmt
            .query_map([owner], |row| {
                Ok(StoredEntry {
                    label: row.get(0)?,
                    username: row.get(1)?,
                    blob: row.get(2)?,
                })
            })
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(entries)
    }

    fn upsert(
        &self,
        owner: &str,
        label: &str,
        username: &str,
        blob: &str,
    ) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO entries (principal_id, label, username, blob, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(principal_id, label) DO UPDATE SET
                username = excluded.username,
                blob = excluded.blob,
                modified_at = excluded.modified_at",
            rusqlite::params![owner, label, username, blob, now],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    fn delete(&self, owner: &str, label: &str) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let deleted = conn
            .execute(
                "DELETE FROM entries WHERE principal_id = ?1 AND label = ?2",
                rusqlite::params![owner, label],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if deleted == 0 {
            return Err(StoreError::NotFound(format!("Entry '{}'", label)));
        }
        Ok(())
    }
}
