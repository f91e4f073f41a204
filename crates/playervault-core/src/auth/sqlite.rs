//! SQLite-backed user table.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::AuthSource;
use crate::config::StoreConfig;
use crate::error::{Result, VaultError};

/// Subjects are known when a row with their exact name exists in `users`.
///
/// Uses WAL mode so an external provisioning tool can write while the
/// gateway reads. Queries run on the blocking thread pool.
pub struct SqliteAuth {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuth {
    /// Open (or create) the database at `db_path`.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| VaultError::Io {
                    message: format!("Failed to create database directory: {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;",
            StoreConfig::DB_BUSY_TIMEOUT_MS,
        ))?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock_conn(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
        conn.lock().map_err(|_| VaultError::Database {
            message: "Failed to acquire users connection lock".to_string(),
            source: None,
        })
    }

    /// Insert a user. Returns `false` if the name already existed.
    pub fn add_user(&self, name: &str) -> Result<bool> {
        let conn = Self::lock_conn(&self.conn)?;
        let rows = conn.execute(
            "INSERT OR IGNORE INTO users (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;
        if rows > 0 {
            debug!("Added user {}", name);
        }
        Ok(rows > 0)
    }

    /// Delete a user. Returns `false` if no such user existed.
    pub fn remove_user(&self, name: &str) -> Result<bool> {
        let conn = Self::lock_conn(&self.conn)?;
        let rows = conn.execute("DELETE FROM users WHERE name = ?1", params![name])?;
        Ok(rows > 0)
    }

    pub fn user_count(&self) -> Result<usize> {
        let conn = Self::lock_conn(&self.conn)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn exists(conn: &Mutex<Connection>, name: &str) -> Result<bool> {
        let conn = Self::lock_conn(conn)?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM users WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl AuthSource for SqliteAuth {
    async fn is_known(&self, subject: &str) -> Result<bool> {
        let conn = Arc::clone(&self.conn);
        let subject = subject.to_string();
        tokio::task::spawn_blocking(move || Self::exists(&conn, &subject))
            .await
            .map_err(|e| VaultError::Database {
                message: format!("users lookup task failed: {}", e),
                source: None,
            })?
    }

    fn name(&self) -> &'static str {
        "database"
    }
}
