use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use crate::error::EngineError;

pub mod models;

/// Keyed blob persistence. The engine only ever reads and writes whole
/// serialized values under well-known keys.
pub trait StateStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, EngineError>;
    fn save(&self, key: &str, value: &str) -> Result<(), EngineError>;
}

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self, EngineError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<(), EngineError> {
        let conn = self.conn.lock().map_err(|_| EngineError::StorePoisoned)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }
}

impl StateStore for Database {
    fn load(&self, key: &str) -> Result<Option<String>, EngineError> {
        let conn = self.conn.lock().map_err(|_| EngineError::StorePoisoned)?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn save(&self, key: &str, value: &str) -> Result<(), EngineError> {
        let conn = self.conn.lock().map_err(|_| EngineError::StorePoisoned)?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value=excluded.value,
                updated_at=excluded.updated_at",
            params![key, value, Utc::now()],
        )?;
        Ok(())
    }
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key         TEXT    PRIMARY KEY,
    value       TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
);
"#;

/// In-memory store for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, EngineError> {
        let values = self.values.lock().map_err(|_| EngineError::StorePoisoned)?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), EngineError> {
        let mut values = self.values.lock().map_err(|_| EngineError::StorePoisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
