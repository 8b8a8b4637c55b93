use std::fmt;

use tidemark_common::Result;

use crate::mutator::SchemaMutator;

/// A named, reversible unit of schema change.
///
/// Names order migrations: they are applied in ascending lexicographic order, so
/// callers prefix them with a timestamp such as `2023_01_16_144259_add_links_table`.
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;

    /// Apply the forward change.
    fn up(&self, schema: &dyn SchemaMutator) -> Result<()>;

    /// Reverse the change. Migrations without a reverse step keep the default no-op.
    fn down(&self, _schema: &dyn SchemaMutator) -> Result<()> {
        Ok(())
    }
}

/// Signature of an up or down action.
pub type MigrationFn = Box<dyn Fn(&dyn SchemaMutator) -> Result<()> + Send + Sync>;

/// A [`Migration`] built from closures, as produced by
/// [`Registry::register`](crate::Registry::register).
pub struct FnMigration {
    name: String,
    up: MigrationFn,
    down: Option<MigrationFn>,
}

impl FnMigration {
    pub fn new(name: impl Into<String>, up: MigrationFn, down: Option<MigrationFn>) -> Self {
        Self {
            name: name.into(),
            up,
            down,
        }
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

impl Migration for FnMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, schema: &dyn SchemaMutator) -> Result<()> {
        (self.up)(schema)
    }

    fn down(&self, schema: &dyn SchemaMutator) -> Result<()> {
        match &self.down {
            Some(down) => down(schema),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMigration")
            .field("name", &self.name)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}
