use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tidemark_common::{Error, Result};
use tidemark_config::DatabaseConfig;
use tracing::info;

/// Shared handle to the SQLite database being migrated.
///
/// Both the schema mutator and the ledger hold an `Arc<Database>` so they act on
/// the same connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let path = config.path.as_path();
        info!("opening database at {}", path.display());
        ensure_parent_dir(path)?;

        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set journal mode: {e}")))?;
        Self::configure(conn, config)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::configure(conn, &DatabaseConfig::default())
    }

    fn configure(conn: Connection, config: &DatabaseConfig) -> Result<Self> {
        let foreign_keys = if config.foreign_keys { "ON" } else { "OFF" };
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys={foreign_keys}; PRAGMA busy_timeout={};",
            config.busy_timeout_ms
        ))
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database lock poisoned".into()))
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Database(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })
        }
        _ => Ok(()),
    }
}
