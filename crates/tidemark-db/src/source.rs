use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tidemark_common::{Error, Result};
use tracing::debug;

use crate::migration::Migration;
use crate::mutator::SchemaMutator;
use crate::registry::Registry;

/// Enumerates the migrations that exist in code or on disk, independent of
/// what the ledger says has been applied.
///
/// Implementations return definitions sorted by ascending name and must give
/// the same answer when called repeatedly within one operation.
pub trait MigrationSource {
    fn definitions(&self) -> Result<Vec<Arc<dyn Migration>>>;
}

impl MigrationSource for Registry {
    fn definitions(&self) -> Result<Vec<Arc<dyn Migration>>> {
        Ok(self.all())
    }
}

/// Merges several sources into one sorted listing.
///
/// A name provided by more than one source is a
/// [`Error::RegistrationConflict`].
#[derive(Default)]
pub struct SourceChain {
    sources: Vec<Box<dyn MigrationSource>>,
}

impl SourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S>(mut self, source: S) -> Self
    where
        S: MigrationSource + 'static,
    {
        self.sources.push(Box::new(source));
        self
    }
}

impl MigrationSource for SourceChain {
    fn definitions(&self) -> Result<Vec<Arc<dyn Migration>>> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for source in &self.sources {
            for migration in source.definitions()? {
                if !seen.insert(migration.name().to_string()) {
                    return Err(Error::RegistrationConflict(migration.name().to_string()));
                }
                all.push(migration);
            }
        }
        all.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(all)
    }
}

/// A migration loaded from a `.sql` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    name: String,
    up_sql: String,
    down_sql: String,
}

impl SqlMigration {
    /// Split file content into its `-- up` and `-- down` sections.
    ///
    /// Lines before the first marker are ignored. A file with no markers at all
    /// is treated as a single up section.
    pub fn parse(name: impl Into<String>, content: &str) -> Self {
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut section = None;
        let mut saw_marker = false;

        for line in content.lines() {
            if let Some(marker) = section_marker(line) {
                section = Some(marker);
                saw_marker = true;
                continue;
            }
            match section {
                Some(Section::Up) => up.push(line),
                Some(Section::Down) => down.push(line),
                None => {}
            }
        }

        let up_sql = if saw_marker {
            up.join("\n")
        } else {
            content.to_string()
        };

        Self {
            name: name.into(),
            up_sql: up_sql.trim().to_string(),
            down_sql: down.join("\n").trim().to_string(),
        }
    }

    pub fn up_sql(&self) -> &str {
        &self.up_sql
    }

    pub fn down_sql(&self) -> &str {
        &self.down_sql
    }
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, schema: &dyn SchemaMutator) -> Result<()> {
        if self.up_sql.is_empty() {
            return Ok(());
        }
        schema.execute(&self.up_sql)
    }

    fn down(&self, schema: &dyn SchemaMutator) -> Result<()> {
        if self.down_sql.is_empty() {
            return Ok(());
        }
        schema.execute(&self.down_sql)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Up,
    Down,
}

fn section_marker(line: &str) -> Option<Section> {
    let label = line.trim().strip_prefix("--")?.trim().to_lowercase();
    match label.as_str() {
        "up" | "up migration" => Some(Section::Up),
        "down" | "down migration" => Some(Section::Down),
        _ => None,
    }
}

/// Loads every `*.sql` file in a directory as a migration named by its file stem.
pub struct SqlDirectorySource {
    dir: PathBuf,
}

impl SqlDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MigrationSource for SqlDirectorySource {
    fn definitions(&self) -> Result<Vec<Arc<dyn Migration>>> {
        if !self.dir.exists() {
            debug!("migrations directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            Error::Config(format!(
                "failed to read migrations directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let mut migrations = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "sql") {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    Error::Config(format!("invalid migration filename: {}", path.display()))
                })?
                .to_string();
            let content = std::fs::read_to_string(&path)?;
            migrations.push(SqlMigration::parse(name, &content));
        }

        migrations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(migrations
            .into_iter()
            .map(|m| Arc::new(m) as Arc<dyn Migration>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &dyn SchemaMutator) -> Result<()> {
        Ok(())
    }

    fn names(definitions: &[Arc<dyn Migration>]) -> Vec<&str> {
        definitions.iter().map(|m| m.name()).collect()
    }

    #[test]
    fn parses_up_and_down_sections() {
        let migration = SqlMigration::parse(
            "2023_01_16_144259_add_links_table",
            "-- Migration: add links table\n\
             -- up\n\
             CREATE TABLE links (id INTEGER PRIMARY KEY);\n\
             -- updated later: keep this comment\n\
             -- down\n\
             DROP TABLE links;\n",
        );

        assert_eq!(
            migration.up_sql(),
            "CREATE TABLE links (id INTEGER PRIMARY KEY);\n-- updated later: keep this comment"
        );
        assert_eq!(migration.down_sql(), "DROP TABLE links;");
    }

    #[test]
    fn file_without_markers_is_all_up() {
        let migration = SqlMigration::parse("x", "CREATE TABLE x (id INTEGER);\n");
        assert_eq!(migration.up_sql(), "CREATE TABLE x (id INTEGER);");
        assert!(migration.down_sql().is_empty());
    }

    #[test]
    fn directory_source_sorts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2023_02_01_b.sql"), "-- up\nSELECT 1;").unwrap();
        std::fs::write(dir.path().join("2023_01_01_a.sql"), "-- up\nSELECT 1;").unwrap();
        std::fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let source = SqlDirectorySource::new(dir.path());
        let definitions = source.definitions().unwrap();
        assert_eq!(names(&definitions), vec!["2023_01_01_a", "2023_02_01_b"]);
    }

    #[test]
    fn directory_source_skips_non_file_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("2023_01_01_archive.sql")).unwrap();
        std::fs::write(dir.path().join("2023_02_01_b.sql"), "-- up\nSELECT 1;").unwrap();

        let definitions = SqlDirectorySource::new(dir.path()).definitions().unwrap();
        assert_eq!(names(&definitions), vec!["2023_02_01_b"]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqlDirectorySource::new(dir.path().join("nope"));
        assert!(source.definitions().unwrap().is_empty());
    }

    #[test]
    fn chain_merges_sorted_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2023_01_15_b.sql"), "-- up\nSELECT 1;").unwrap();

        let mut registry = Registry::new();
        registry.register("2023_01_01_a", noop, noop).unwrap();
        registry.register("2023_02_01_c", noop, noop).unwrap();

        let chain = SourceChain::new()
            .with(registry.clone())
            .with(SqlDirectorySource::new(dir.path()));
        let definitions = chain.definitions().unwrap();
        assert_eq!(
            names(&definitions),
            vec!["2023_01_01_a", "2023_01_15_b", "2023_02_01_c"]
        );

        std::fs::write(dir.path().join("2023_01_01_a.sql"), "-- up\nSELECT 1;").unwrap();
        let chain = SourceChain::new()
            .with(registry)
            .with(SqlDirectorySource::new(dir.path()));
        let Err(err) = chain.definitions() else {
            panic!("expected a registration conflict");
        };
        assert!(matches!(err, Error::RegistrationConflict(name) if name == "2023_01_01_a"));
    }
}
