pub mod database;
pub mod ledger;
pub mod lock;
pub mod migration;
pub mod migrator;
pub mod mutator;
pub mod registry;
pub mod schema;
pub mod source;

pub use database::Database;
pub use ledger::{Ledger, MigrationRecord, SqliteLedger};
pub use lock::{FileLock, LockGuard, MigrationLock, NoLock};
pub use migration::{FnMigration, Migration, MigrationFn};
pub use migrator::{
    FreshOutcome, MigrationState, MigrationStatus, Migrator, RefreshOutcome, RollbackOutcome,
    UpOutcome,
};
pub use mutator::{SchemaMutator, SqliteMutator};
pub use registry::Registry;
pub use schema::{ColumnDef, ColumnType, ForeignKeyDef, IndexDef, TableDef};
pub use source::{MigrationSource, SourceChain, SqlDirectorySource, SqlMigration};
