//! Orchestrates up, rollback, reset, refresh and fresh.
//!
//! A migrator ties together a [`MigrationSource`] (what exists), a [`Ledger`]
//! (what has been applied) and a [`SchemaMutator`] (how to change the schema).
//! Every operation runs synchronously and in order; the first failing action
//! stops the operation and is returned as [`Error::SchemaActionFailed`]. Work
//! completed before the failure stays committed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tidemark_common::{Direction, Error, Result};
use tracing::{info, warn};

use crate::database::Database;
use crate::ledger::{Ledger, MigrationRecord, SqliteLedger};
use crate::lock::{MigrationLock, NoLock};
use crate::migration::Migration;
use crate::mutator::{SchemaMutator, SqliteMutator};
use crate::source::MigrationSource;

/// Result of [`Migrator::up`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpOutcome {
    /// Every known migration already has a ledger record.
    AlreadyUpToDate,
    Applied { batch: i64, migrations: Vec<String> },
}

/// Result of [`Migrator::rollback`] and [`Migrator::reset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    NothingToRollback,
    RolledBack {
        /// Records removed, in the order they were rolled back.
        migrations: Vec<String>,
        /// Records whose definition no longer exists; their down action was skipped.
        missing: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub reset: RollbackOutcome,
    pub up: UpOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreshOutcome {
    /// Every table dropped from the live schema, tracked or not.
    pub dropped: Vec<String>,
    pub up: UpOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    Applied { batch: i64 },
    /// Recorded in the ledger but no longer provided by the source.
    Missing { batch: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

pub struct Migrator {
    source: Box<dyn MigrationSource>,
    ledger: Box<dyn Ledger>,
    schema: Box<dyn SchemaMutator>,
    lock: Box<dyn MigrationLock>,
}

impl Migrator {
    /// Build a migrator and make sure the ledger table exists.
    ///
    /// Fails with [`Error::LedgerUnavailable`] if the ledger cannot be checked or created.
    pub fn new<S, L, M>(source: S, ledger: L, schema: M) -> Result<Self>
    where
        S: MigrationSource + 'static,
        L: Ledger + 'static,
        M: SchemaMutator + 'static,
    {
        let migrator = Self {
            source: Box::new(source),
            ledger: Box::new(ledger),
            schema: Box::new(schema),
            lock: Box::new(NoLock),
        };
        migrator.ensure_ledger()?;
        Ok(migrator)
    }

    /// Migrator over a SQLite database, keeping the ledger in `table`.
    pub fn sqlite<S>(db: Arc<Database>, source: S, table: &str) -> Result<Self>
    where
        S: MigrationSource + 'static,
    {
        Self::new(
            source,
            SqliteLedger::new(db.clone(), table),
            SqliteMutator::new(db),
        )
    }

    /// Wrap every subsequent operation in `lock`.
    pub fn with_lock<K>(mut self, lock: K) -> Self
    where
        K: MigrationLock + 'static,
    {
        self.lock = Box::new(lock);
        self
    }

    /// Create the ledger table if it does not exist. Safe to call repeatedly.
    pub fn ensure_ledger(&self) -> Result<()> {
        let table = self.ledger.table_name();
        let exists = self
            .schema
            .has_table(table)
            .map_err(|e| Error::LedgerUnavailable(e.to_string()))?;
        if !exists {
            self.create_ledger()?;
        }
        Ok(())
    }

    fn create_ledger(&self) -> Result<()> {
        self.schema
            .create_table(&self.ledger.table_def())
            .map_err(|e| Error::LedgerUnavailable(e.to_string()))?;
        info!("created migration ledger {}", self.ledger.table_name());
        Ok(())
    }

    /// Apply every pending migration, in name order, as one new batch.
    pub fn up(&self) -> Result<UpOutcome> {
        let _guard = self.lock.acquire()?;
        self.run_up()
    }

    /// Undo the most recent batch.
    pub fn rollback(&self) -> Result<RollbackOutcome> {
        let _guard = self.lock.acquire()?;
        self.run_rollback()
    }

    /// Undo every applied migration.
    pub fn reset(&self) -> Result<RollbackOutcome> {
        let _guard = self.lock.acquire()?;
        self.run_reset()
    }

    /// Reset, then apply everything again.
    pub fn refresh(&self) -> Result<RefreshOutcome> {
        let _guard = self.lock.acquire()?;
        let reset = self.run_reset()?;
        let up = self.run_up()?;
        Ok(RefreshOutcome { reset, up })
    }

    /// Drop **every** table in the database, including ones no migration
    /// created, then rebuild the ledger and apply all migrations from scratch.
    ///
    /// This destroys data irreversibly. Only run it against disposable
    /// databases such as local development or test fixtures.
    pub fn fresh(&self) -> Result<FreshOutcome> {
        let _guard = self.lock.acquire()?;
        warn!("dropping all tables");
        let dropped = self.schema.drop_all_tables()?;
        self.create_ledger()?;
        let up = self.run_up()?;
        Ok(FreshOutcome { dropped, up })
    }

    /// Every known migration with its state, plus ledger records whose
    /// definition has disappeared, sorted by name.
    pub fn status(&self) -> Result<Vec<MigrationStatus>> {
        let definitions = self.source.definitions()?;
        let records = self.ledger.records()?;
        let batches: HashMap<&str, i64> = records
            .iter()
            .map(|r| (r.migration.as_str(), r.batch))
            .collect();

        let mut statuses: Vec<MigrationStatus> = definitions
            .iter()
            .map(|m| MigrationStatus {
                name: m.name().to_string(),
                state: match batches.get(m.name()) {
                    Some(&batch) => MigrationState::Applied { batch },
                    None => MigrationState::Pending,
                },
            })
            .collect();

        let known: HashSet<&str> = definitions.iter().map(|m| m.name()).collect();
        statuses.extend(
            records
                .iter()
                .filter(|r| !known.contains(r.migration.as_str()))
                .map(|r| MigrationStatus {
                    name: r.migration.clone(),
                    state: MigrationState::Missing { batch: r.batch },
                }),
        );
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(statuses)
    }

    fn sorted_definitions(&self) -> Result<Vec<Arc<dyn Migration>>> {
        let mut definitions = self.source.definitions()?;
        definitions.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(definitions)
    }

    fn run_up(&self) -> Result<UpOutcome> {
        let definitions = self.sorted_definitions()?;
        let records = self.ledger.records()?;
        let applied: HashSet<&str> = records.iter().map(|r| r.migration.as_str()).collect();

        let pending: Vec<&Arc<dyn Migration>> = definitions
            .iter()
            .filter(|m| !applied.contains(m.name()))
            .collect();
        if pending.is_empty() {
            info!("nothing to migrate");
            return Ok(UpOutcome::AlreadyUpToDate);
        }

        let batch = self.ledger.last_batch()? + 1;
        let mut migrated = Vec::with_capacity(pending.len());
        for migration in pending {
            let name = migration.name();
            info!(batch, "migrating {name}");
            migration
                .up(self.schema.as_ref())
                .map_err(|e| Error::schema_action(name, Direction::Up, e))?;
            self.ledger.insert(name, batch)?;
            info!(batch, "migrated {name}");
            migrated.push(name.to_string());
        }

        Ok(UpOutcome::Applied {
            batch,
            migrations: migrated,
        })
    }

    fn run_rollback(&self) -> Result<RollbackOutcome> {
        let last_batch = self.ledger.last_batch()?;
        let batch = self
            .ledger
            .records()?
            .into_iter()
            .filter(|r| r.batch == last_batch)
            .collect();
        self.roll_back(batch)
    }

    fn run_reset(&self) -> Result<RollbackOutcome> {
        let records = self.ledger.records()?;
        self.roll_back(records)
    }

    /// Run the down action of each record's migration in reverse name order,
    /// deleting each record once its action succeeds.
    fn roll_back(&self, mut records: Vec<MigrationRecord>) -> Result<RollbackOutcome> {
        if records.is_empty() {
            info!("nothing to roll back");
            return Ok(RollbackOutcome::NothingToRollback);
        }
        records.sort_by(|a, b| b.migration.cmp(&a.migration).then(b.id.cmp(&a.id)));

        let definitions: HashMap<String, Arc<dyn Migration>> = self
            .source
            .definitions()?
            .into_iter()
            .map(|m| (m.name().to_string(), m))
            .collect();

        let mut rolled_back = Vec::with_capacity(records.len());
        let mut missing = Vec::new();
        for record in records {
            let name = record.migration;
            match definitions.get(&name) {
                Some(migration) => {
                    info!(batch = record.batch, "rolling back {name}");
                    migration
                        .down(self.schema.as_ref())
                        .map_err(|e| Error::schema_action(name.as_str(), Direction::Down, e))?;
                }
                None => {
                    warn!(
                        batch = record.batch,
                        "migration {name} is no longer defined, removing its record without running down"
                    );
                    missing.push(name.clone());
                }
            }
            self.ledger.delete(&name)?;
            info!(batch = record.batch, "rolled back {name}");
            rolled_back.push(name);
        }

        Ok(RollbackOutcome::RolledBack {
            migrations: rolled_back,
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::lock::LockGuard;
    use crate::registry::Registry;
    use crate::schema::TableDef;

    fn create_table(name: &'static str) -> impl Fn(&dyn SchemaMutator) -> Result<()> {
        move |schema| {
            let mut table = TableDef::new(name);
            table.id();
            schema.create_table(&table)
        }
    }

    fn drop_table(name: &'static str) -> impl Fn(&dyn SchemaMutator) -> Result<()> {
        move |schema| schema.drop_table(name)
    }

    fn registry(names: &[&'static str]) -> Registry {
        let mut registry = Registry::new();
        for &name in names {
            registry
                .register(name, create_table(name), drop_table(name))
                .unwrap();
        }
        registry
    }

    fn migrator(db: &Arc<Database>, registry: Registry) -> Migrator {
        Migrator::sqlite(db.clone(), registry, "migrations").unwrap()
    }

    #[test]
    fn construction_creates_ledger_once() {
        let db = Arc::new(Database::in_memory().unwrap());
        let schema = SqliteMutator::new(db.clone());
        assert!(!schema.has_table("migrations").unwrap());

        let m = migrator(&db, Registry::new());
        assert!(schema.has_table("migrations").unwrap());
        m.ensure_ledger().unwrap();
        migrator(&db, Registry::new());
    }

    #[test]
    fn up_on_empty_registry_is_up_to_date() {
        let db = Arc::new(Database::in_memory().unwrap());
        let m = migrator(&db, Registry::new());
        assert_eq!(m.up().unwrap(), UpOutcome::AlreadyUpToDate);
    }

    #[test]
    fn rollback_on_empty_ledger_reports_nothing() {
        let db = Arc::new(Database::in_memory().unwrap());
        let m = migrator(&db, registry(&["a"]));
        assert_eq!(m.rollback().unwrap(), RollbackOutcome::NothingToRollback);
        assert_eq!(m.reset().unwrap(), RollbackOutcome::NothingToRollback);
    }

    #[test]
    fn up_applies_in_name_order_as_one_batch() {
        let db = Arc::new(Database::in_memory().unwrap());
        let m = migrator(&db, registry(&["c", "a", "b"]));

        let outcome = m.up().unwrap();
        assert_eq!(
            outcome,
            UpOutcome::Applied {
                batch: 1,
                migrations: vec!["a".into(), "b".into(), "c".into()],
            }
        );
    }

    #[test]
    fn down_failure_keeps_record() {
        let db = Arc::new(Database::in_memory().unwrap());
        let mut registry = registry(&["a"]);
        registry
            .register("b", create_table("b"), |schema: &dyn SchemaMutator| {
                schema.execute("DROP TABLE not_there")
            })
            .unwrap();

        let m = migrator(&db, registry);
        m.up().unwrap();

        let err = m.rollback().unwrap_err();
        assert!(matches!(
            &err,
            Error::SchemaActionFailed { name, direction: Direction::Down, .. } if name == "b"
        ));

        let ledger = SqliteLedger::new(db.clone(), "migrations");
        let names: Vec<String> = ledger
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.migration)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn missing_definition_is_removed_without_down() {
        let db = Arc::new(Database::in_memory().unwrap());
        migrator(&db, registry(&["a", "b"])).up().unwrap();

        // "b" was deleted from the codebase
        let m = migrator(&db, registry(&["a"]));
        let outcome = m.rollback().unwrap();
        assert_eq!(
            outcome,
            RollbackOutcome::RolledBack {
                migrations: vec!["b".into(), "a".into()],
                missing: vec!["b".into()],
            }
        );

        let schema = SqliteMutator::new(db);
        assert!(schema.has_table("b").unwrap());
        assert!(!schema.has_table("a").unwrap());
    }

    #[test]
    fn status_reports_each_state() {
        let db = Arc::new(Database::in_memory().unwrap());
        migrator(&db, registry(&["a", "gone"])).up().unwrap();

        let m = migrator(&db, registry(&["a", "b"]));
        let statuses = m.status().unwrap();
        assert_eq!(
            statuses,
            vec![
                MigrationStatus {
                    name: "a".into(),
                    state: MigrationState::Applied { batch: 1 },
                },
                MigrationStatus {
                    name: "b".into(),
                    state: MigrationState::Pending,
                },
                MigrationStatus {
                    name: "gone".into(),
                    state: MigrationState::Missing { batch: 1 },
                },
            ]
        );

        let json = serde_json::to_value(&statuses[0]).unwrap();
        assert_eq!(json["state"], "applied");
        assert_eq!(json["batch"], 1);
    }

    struct RecordingLock {
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MigrationLock for RecordingLock {
        fn acquire(&self) -> Result<LockGuard> {
            self.events.lock().unwrap().push("acquire");
            let events = self.events.clone();
            Ok(LockGuard::new(move || events.lock().unwrap().push("release")))
        }
    }

    #[test]
    fn lock_is_released_on_failure() {
        let db = Arc::new(Database::in_memory().unwrap());
        let mut registry = Registry::new();
        registry
            .register_irreversible("a", |schema: &dyn SchemaMutator| {
                schema.execute("CREATE TABLE broken (")
            })
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let m = migrator(&db, registry).with_lock(RecordingLock {
            events: events.clone(),
        });

        assert!(m.up().is_err());
        m.refresh().unwrap_err();
        assert_eq!(
            *events.lock().unwrap(),
            vec!["acquire", "release", "acquire", "release"]
        );
    }
}
