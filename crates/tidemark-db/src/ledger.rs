use std::sync::Arc;

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tidemark_common::{Error, Result};

use crate::database::Database;
use crate::schema::{TableDef, quote_ident};

/// A row of the ledger: proof that a migration has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub migration: String,
    pub batch: i64,
}

/// Persisted record of applied migrations.
///
/// The backing table has the columns `id` (auto-increment primary key),
/// `migration` (unique, not null) and `batch` (not null). Other tooling reads
/// this table, so its shape is fixed.
pub trait Ledger {
    fn table_name(&self) -> &str;

    /// Definition of the backing table, used by the migrator to create it.
    fn table_def(&self) -> TableDef {
        let mut table = TableDef::new(self.table_name());
        table.id();
        table.string("migration", 255).unique();
        table.integer("batch");
        table
    }

    /// All records in ascending id order.
    fn records(&self) -> Result<Vec<MigrationRecord>>;

    /// Highest batch number recorded, or 0 for an empty ledger.
    fn last_batch(&self) -> Result<i64> {
        Ok(self
            .records()?
            .iter()
            .map(|r| r.batch)
            .max()
            .unwrap_or(0))
    }

    fn insert(&self, migration: &str, batch: i64) -> Result<MigrationRecord>;

    /// Physically delete the record for `migration`.
    fn delete(&self, migration: &str) -> Result<()>;
}

/// [`Ledger`] stored in a table of a SQLite [`Database`].
pub struct SqliteLedger {
    db: Arc<Database>,
    table: String,
}

impl SqliteLedger {
    pub fn new(db: Arc<Database>, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
        }
    }
}

impl Ledger for SqliteLedger {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn records(&self) -> Result<Vec<MigrationRecord>> {
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, migration, batch FROM {} ORDER BY id ASC",
                quote_ident(&self.table)
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(MigrationRecord {
                    id: row.get(0)?,
                    migration: row.get(1)?,
                    batch: row.get(2)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to query migrations: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| Error::Database(format!("failed to read migration row: {e}")))?,
            );
        }
        Ok(records)
    }

    fn last_batch(&self) -> Result<i64> {
        let conn = self.db.connection()?;
        conn.query_row(
            &format!(
                "SELECT COALESCE(MAX(batch), 0) FROM {}",
                quote_ident(&self.table)
            ),
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to read last batch: {e}")))
    }

    fn insert(&self, migration: &str, batch: i64) -> Result<MigrationRecord> {
        let conn = self.db.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (migration, batch) VALUES (?1, ?2)",
                quote_ident(&self.table)
            ),
            params![migration, batch],
        )
        .map_err(|e| Error::Database(format!("failed to record migration {migration}: {e}")))?;

        Ok(MigrationRecord {
            id: conn.last_insert_rowid(),
            migration: migration.to_string(),
            batch,
        })
    }

    fn delete(&self, migration: &str) -> Result<()> {
        let conn = self.db.connection()?;
        let deleted = conn
            .execute(
                &format!(
                    "DELETE FROM {} WHERE migration = ?1",
                    quote_ident(&self.table)
                ),
                params![migration],
            )
            .map_err(|e| {
                Error::Database(format!("failed to delete migration record {migration}: {e}"))
            })?;

        if deleted == 0 {
            return Err(Error::NotFound(format!("migration record {migration}")));
        }
        Ok(())
    }
}
