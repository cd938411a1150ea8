// Credential persistence
// The token pair lives in a key-value store under two fixed keys

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::CredentialPair;

/// Key of the access token entry
pub const ACCESS_TOKEN_KEY: &str = "api_access_token";

/// Key of the refresh token entry
pub const REFRESH_TOKEN_KEY: &str = "api_refresh_token";

/// Storage for the credential pair
///
/// Implementations never fail outward: an unreadable store reads as "no
/// token" and a failed write is logged. `set` replaces both fields together.
///
/// `get` and `clear` are called while the refresh slot is locked, so they
/// must return quickly and must not await or wait on the network.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<CredentialPair>;
    fn set(&self, pair: &CredentialPair);
    fn clear(&self);

    /// Store `pair` only if the stored refresh token is still `expected_refresh`.
    /// Returns whether the write happened.
    fn replace_if(&self, expected_refresh: &str, pair: &CredentialPair) -> bool;

    /// Clear only if the stored refresh token is still `expected_refresh`.
    /// Returns whether anything was cleared.
    fn clear_if(&self, expected_refresh: &str) -> bool;
}

/// Process-local store, mostly for tests and short-lived tools
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    pair: Mutex<Option<CredentialPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: Mutex::new(Some(pair)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<CredentialPair>> {
        self.pair.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<CredentialPair> {
        self.slot().clone()
    }

    fn set(&self, pair: &CredentialPair) {
        *self.slot() = Some(pair.clone());
    }

    fn clear(&self) {
        *self.slot() = None;
    }

    fn replace_if(&self, expected_refresh: &str, pair: &CredentialPair) -> bool {
        let mut slot = self.slot();
        if !holds_refresh_token(slot.as_ref(), expected_refresh) {
            return false;
        }
        *slot = Some(pair.clone());
        true
    }

    fn clear_if(&self, expected_refresh: &str) -> bool {
        let mut slot = self.slot();
        if !holds_refresh_token(slot.as_ref(), expected_refresh) {
            return false;
        }
        *slot = None;
        true
    }
}

fn holds_refresh_token(pair: Option<&CredentialPair>, expected: &str) -> bool {
    pair.is_some_and(|p| p.has_refresh_token() && p.refresh_token == expected)
}

/// SQLite-backed store, survives process restarts
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create credentials directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database, gone when the store is dropped
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS auth_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> Result<Option<CredentialPair>> {
        read_pair(&self.conn())
    }

    fn write(&self, pair: &CredentialPair) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("Failed to begin transaction")?;
        write_pair(&tx, pair)?;
        tx.commit().context("Failed to commit credentials")
    }

    fn delete(&self) -> Result<()> {
        delete_pair(&self.conn())
    }

    /// Apply `next` (write, or delete when `None`) only if the stored refresh
    /// token equals `expected_refresh`. The check and the change share one
    /// immediate transaction, so another process cannot slip in between.
    fn compare_and_apply(
        &self,
        expected_refresh: &str,
        next: Option<&CredentialPair>,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;

        let current = read_value(&tx, REFRESH_TOKEN_KEY)?.unwrap_or_default();
        if current.is_empty() || current != expected_refresh {
            return Ok(false);
        }

        match next {
            Some(pair) => write_pair(&tx, pair)?,
            None => delete_pair(&tx)?,
        }

        tx.commit().context("Failed to commit credentials")?;
        Ok(true)
    }
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
    .with_context(|| format!("Failed to read {} from SQLite", key))
}

fn read_pair(conn: &Connection) -> Result<Option<CredentialPair>> {
    let access_token = read_value(conn, ACCESS_TOKEN_KEY)?.unwrap_or_default();
    let refresh_token = read_value(conn, REFRESH_TOKEN_KEY)?.unwrap_or_default();

    if access_token.is_empty() && refresh_token.is_empty() {
        return Ok(None);
    }

    Ok(Some(CredentialPair {
        access_token,
        refresh_token,
    }))
}

fn write_pair(conn: &Connection, pair: &CredentialPair) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    // Refresh token first so a rotation never pairs a new access token with a stale refresh token
    for (key, value) in [
        (REFRESH_TOKEN_KEY, &pair.refresh_token),
        (ACCESS_TOKEN_KEY, &pair.access_token),
    ] {
        conn.execute(
            "INSERT INTO auth_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )
        .with_context(|| format!("Failed to write {}", key))?;
    }
    Ok(())
}

fn delete_pair(conn: &Connection) -> Result<()> {
    conn.execute(
        "DELETE FROM auth_kv WHERE key IN (?1, ?2)",
        params![ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY],
    )
    .context("Failed to delete credentials")?;
    Ok(())
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self) -> Option<CredentialPair> {
        match self.read() {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "Credential store unreadable, treating as signed out");
                None
            }
        }
    }

    fn set(&self, pair: &CredentialPair) {
        if let Err(e) = self.write(pair) {
            tracing::warn!(error = %e, "Failed to persist credentials");
        }
    }

    fn clear(&self) {
        if let Err(e) = self.delete() {
            tracing::warn!(error = %e, "Failed to clear credentials");
        }
    }

    fn replace_if(&self, expected_refresh: &str, pair: &CredentialPair) -> bool {
        self.compare_and_apply(expected_refresh, Some(pair))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to persist credentials");
                false
            })
    }

    fn clear_if(&self, expected_refresh: &str) -> bool {
        self.compare_and_apply(expected_refresh, None)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to clear credentials");
                false
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!(
            "portal-client-{}-{}-{}.sqlite3",
            name,
            std::process::id(),
            nanos
        ))
    }

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().is_none());

        store.set(&CredentialPair::new("X", "Y"));
        assert_eq!(store.get(), Some(CredentialPair::new("X", "Y")));

        store.set(&CredentialPair::new("X2", "Y2"));
        assert_eq!(store.get(), Some(CredentialPair::new("X2", "Y2")));

        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_sqlite_store_lifecycle() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        assert!(store.get().is_none());

        store.set(&CredentialPair::new("A1", "R1"));
        assert_eq!(store.get(), Some(CredentialPair::new("A1", "R1")));

        store.set(&CredentialPair::new("A2", "R2"));
        assert_eq!(store.get(), Some(CredentialPair::new("A2", "R2")));

        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_memory_store_compare_and_set() {
        let store = MemoryCredentialStore::with_pair(CredentialPair::new("A1", "R1"));

        assert!(!store.replace_if("R0", &CredentialPair::new("A2", "R2")));
        assert_eq!(store.get(), Some(CredentialPair::new("A1", "R1")));

        assert!(store.replace_if("R1", &CredentialPair::new("A2", "R2")));
        assert_eq!(store.get(), Some(CredentialPair::new("A2", "R2")));

        assert!(!store.clear_if("R1"));
        assert!(store.get().is_some());
        assert!(store.clear_if("R2"));
        assert!(store.get().is_none());

        // Nothing stored: nothing to replace
        assert!(!store.replace_if("R2", &CredentialPair::new("A3", "R3")));
        assert!(store.get().is_none());
    }

    #[test]
    fn test_sqlite_store_compare_and_set() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.set(&CredentialPair::new("A1", "R1"));

        assert!(!store.replace_if("R0", &CredentialPair::new("A2", "R2")));
        assert_eq!(store.get(), Some(CredentialPair::new("A1", "R1")));

        assert!(store.replace_if("R1", &CredentialPair::new("A2", "R2")));
        assert_eq!(store.get(), Some(CredentialPair::new("A2", "R2")));

        assert!(!store.clear_if("R1"));
        assert_eq!(store.get(), Some(CredentialPair::new("A2", "R2")));
        assert!(store.clear_if("R2"));
        assert!(store.get().is_none());

        assert!(!store.replace_if("R2", &CredentialPair::new("A3", "R3")));
        assert!(store.get().is_none());
    }

    #[test]
    fn test_sqlite_store_access_only() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.set(&CredentialPair::new("A1", ""));

        let pair = store.get().unwrap();
        assert_eq!(pair.access_token, "A1");
        assert!(!pair.has_refresh_token());
    }

    #[test]
    fn test_sqlite_store_rehydrates_after_reopen() {
        let path = temp_db_path("rehydrate");

        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.set(&CredentialPair::new("A1", "R1"));
        }

        let reopened = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(reopened.get(), Some(CredentialPair::new("A1", "R1")));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_sqlite_store_uses_fixed_keys() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.set(&CredentialPair::new("A1", "R1"));

        let conn = store.conn();
        let mut stmt = conn
            .prepare("SELECT key FROM auth_kv ORDER BY key")
            .unwrap();
        let keys: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(keys, vec![ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY]);
    }
}
