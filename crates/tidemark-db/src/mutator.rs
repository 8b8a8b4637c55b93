use std::sync::Arc;

use rusqlite::{Connection, params};
use tidemark_common::{Error, Result};
use tracing::{debug, info};

use crate::database::Database;
use crate::schema::{ColumnDef, TableDef, quote_ident};

/// Executes DDL against the live schema.
///
/// Migration actions receive a `&dyn SchemaMutator` and do all their work
/// through it. Every method is synchronous and reports failures as
/// [`Error::Database`].
pub trait SchemaMutator {
    fn has_table(&self, name: &str) -> Result<bool>;

    fn has_column(&self, table: &str, column: &str) -> Result<bool>;

    fn create_table(&self, table: &TableDef) -> Result<()>;

    fn drop_table(&self, name: &str) -> Result<()>;

    fn add_column(&self, table: &str, column: &ColumnDef) -> Result<()>;

    fn drop_column(&self, table: &str, column: &str) -> Result<()>;

    /// Run one or more raw SQL statements.
    fn execute(&self, sql: &str) -> Result<()>;

    /// Every user table currently in the catalog, sorted by name.
    fn table_names(&self) -> Result<Vec<String>>;

    /// Drop every table in the catalog and return their names.
    fn drop_all_tables(&self) -> Result<Vec<String>> {
        let tables = self.table_names()?;
        for table in &tables {
            self.drop_table(table)?;
        }
        Ok(tables)
    }
}

/// [`SchemaMutator`] backed by a SQLite [`Database`].
pub struct SqliteMutator {
    db: Arc<Database>,
}

impl SqliteMutator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl SchemaMutator for SqliteMutator {
    fn has_table(&self, name: &str) -> Result<bool> {
        let conn = self.db.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check table {name}: {e}")))?;
        Ok(count > 0)
    }

    fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let conn = self.db.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
                params![table, column],
                |row| row.get(0),
            )
            .map_err(|e| {
                Error::Database(format!("failed to check column {table}.{column}: {e}"))
            })?;
        Ok(count > 0)
    }

    fn create_table(&self, table: &TableDef) -> Result<()> {
        let conn = self.db.connection()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        for statement in table.create_statements() {
            tx.execute(&statement, []).map_err(|e| {
                Error::Database(format!("failed to create table {}: {e}", table.name))
            })?;
        }
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to create table {}: {e}", table.name)))?;
        debug!("created table {}", table.name);
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        let conn = self.db.connection()?;
        drop_table_on(&conn, name)
    }

    fn add_column(&self, table: &str, column: &ColumnDef) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute(
            &format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(table),
                column.to_sql()
            ),
            [],
        )
        .map_err(|e| {
            Error::Database(format!("failed to add column {table}.{}: {e}", column.name))
        })?;
        Ok(())
    }

    fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute(
            &format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(table),
                quote_ident(column)
            ),
            [],
        )
        .map_err(|e| Error::Database(format!("failed to drop column {table}.{column}: {e}")))?;
        Ok(())
    }

    fn execute(&self, sql: &str) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute_batch(sql)
            .map_err(|e| Error::Database(format!("statement failed: {e}")))
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let conn = self.db.connection()?;
        table_names_on(&conn)
    }

    /// Drops with foreign key enforcement switched off, restoring the previous
    /// setting afterwards.
    fn drop_all_tables(&self) -> Result<Vec<String>> {
        let conn = self.db.connection()?;
        let tables = table_names_on(&conn)?;

        let foreign_keys: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to read foreign_keys pragma: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys = OFF;")
            .map_err(|e| Error::Database(format!("failed to disable foreign keys: {e}")))?;

        let dropped = tables
            .iter()
            .try_for_each(|table| drop_table_on(&conn, table));

        let restore = if foreign_keys != 0 { "ON" } else { "OFF" };
        conn.execute_batch(&format!("PRAGMA foreign_keys = {restore};"))
            .map_err(|e| Error::Database(format!("failed to restore foreign keys: {e}")))?;

        dropped?;
        info!("dropped {} tables", tables.len());
        Ok(tables)
    }
}

fn drop_table_on(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)), [])
        .map_err(|e| Error::Database(format!("failed to drop table {name}: {e}")))?;
    debug!("dropped table {name}");
    Ok(())
}

fn table_names_on(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| Error::Database(format!("failed to list tables: {e}")))?;

    let mut names = Vec::new();
    for row in rows {
        names.push(row.map_err(|e| Error::Database(format!("failed to read table row: {e}")))?);
    }
    Ok(names)
}
