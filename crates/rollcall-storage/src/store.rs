//! SQLite user record store.
//!
//! A connection is opened per logical operation (bootstrap, insert, get,
//! list) and closed when it goes out of scope.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    profile_image BLOB
);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("user name must not be empty")]
    EmptyName,
}

/// A full user row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub profile_image: Option<Vec<u8>>,
}

/// A user row without the image blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
    pub image_bytes: u64,
}

pub struct UserStore {
    db_path: PathBuf,
}

impl UserStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Create the database directory and `users` table if absent. Safe to run
    /// on every startup.
    pub fn bootstrap(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        self.connect()?.execute_batch(SCHEMA)?;
        tracing::debug!(path = %self.db_path.display(), "user table ready");
        Ok(())
    }

    /// Insert a user and return the assigned id.
    ///
    /// The id is read inside the same IMMEDIATE transaction that wrote the
    /// row, and the transaction is committed before returning.
    pub fn insert(&self, name: &str, profile_image: &[u8]) -> Result<i64, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::EmptyName);
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO users (name, profile_image) VALUES (?1, ?2)",
            params![name, profile_image],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!(id, name, image_bytes = profile_image.len(), "user inserted");
        Ok(id)
    }

    /// Look up a user by id. `Ok(None)` if no such user exists.
    pub fn get(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT id, name, profile_image FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        profile_image: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// All users ordered by id.
    pub fn list(&self) -> Result<Vec<UserSummary>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, COALESCE(length(profile_image), 0) FROM users ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    image_bytes: row.get::<_, i64>(2)?.max(0) as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
