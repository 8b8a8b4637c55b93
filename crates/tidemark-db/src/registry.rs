use std::collections::BTreeMap;
use std::sync::Arc;

use tidemark_common::{Error, Result};
use tracing::debug;

use crate::migration::{FnMigration, Migration};
use crate::mutator::SchemaMutator;

/// Catalog of migrations known to the process, keyed and ordered by name.
///
/// Built explicitly by the caller at startup and handed to a
/// [`Migrator`](crate::Migrator) as its [`MigrationSource`](crate::MigrationSource).
/// Cloning is cheap; definitions are shared.
#[derive(Clone, Default)]
pub struct Registry {
    migrations: BTreeMap<String, Arc<dyn Migration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration with both an up and a down action.
    pub fn register<U, D>(&mut self, name: impl Into<String>, up: U, down: D) -> Result<()>
    where
        U: Fn(&dyn SchemaMutator) -> Result<()> + Send + Sync + 'static,
        D: Fn(&dyn SchemaMutator) -> Result<()> + Send + Sync + 'static,
    {
        self.add(FnMigration::new(name, Box::new(up), Some(Box::new(down))))
    }

    /// Register a migration that has no down action. Rolling it back only
    /// removes its ledger record.
    pub fn register_irreversible<U>(&mut self, name: impl Into<String>, up: U) -> Result<()>
    where
        U: Fn(&dyn SchemaMutator) -> Result<()> + Send + Sync + 'static,
    {
        self.add(FnMigration::new(name, Box::new(up), None))
    }

    /// Register any [`Migration`] implementation.
    ///
    /// A second registration under an existing name is rejected with
    /// [`Error::RegistrationConflict`]; the first definition is kept.
    pub fn add<M>(&mut self, migration: M) -> Result<()>
    where
        M: Migration + 'static,
    {
        let name = migration.name().to_string();
        if self.migrations.contains_key(&name) {
            return Err(Error::RegistrationConflict(name));
        }
        debug!("registered migration {name}");
        self.migrations.insert(name, Arc::new(migration));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Migration>> {
        self.migrations.get(name).cloned()
    }

    /// All migrations in ascending name order.
    pub fn all(&self) -> Vec<Arc<dyn Migration>> {
        self.migrations.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &dyn SchemaMutator) -> Result<()> {
        Ok(())
    }

    #[test]
    fn all_is_sorted_regardless_of_registration_order() {
        let mut registry = Registry::new();
        registry.register("2023_02_01_create_c", noop, noop).unwrap();
        registry.register("2023_01_01_create_a", noop, noop).unwrap();
        registry.register("2023_01_15_create_b", noop, noop).unwrap();

        let names: Vec<String> = registry.all().iter().map(|m| m.name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "2023_01_01_create_a",
                "2023_01_15_create_b",
                "2023_02_01_create_c"
            ]
        );
    }

    #[test]
    fn duplicate_name_is_a_conflict() {
        let mut registry = Registry::new();
        registry.register("2023_01_01_create_a", noop, noop).unwrap();

        let err = registry
            .register_irreversible("2023_01_01_create_a", noop)
            .unwrap_err();
        assert!(matches!(err, Error::RegistrationConflict(name) if name == "2023_01_01_create_a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_finds_registered_migration() {
        let mut registry = Registry::new();
        registry.register_irreversible("2023_01_01_create_a", noop).unwrap();

        assert!(registry.lookup("2023_01_01_create_a").is_some());
        assert!(registry.lookup("2023_01_02_missing").is_none());
        assert!(!registry.is_empty());
    }
}
