use std::path::{Path, PathBuf};

use tidemark_common::{Error, Result};

use crate::model::AppConfig;

/// Loads `AppConfig` from a YAML or TOML file and layers environment overrides on top.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Read the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            return Ok(AppConfig::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(path, &contents)
    }

    /// Load the file, then apply overrides from the process environment.
    pub fn load_with_env(path: &Path) -> Result<AppConfig> {
        let mut config = Self::load(path)?;
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    fn parse(path: &Path, contents: &str) -> Result<AppConfig> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Apply `DB_SQL_FILE`, `MIGRATIONS_TABLE`, `MIGRATIONS_DIR` and `LOG_LEVEL`.
    ///
    /// Takes a lookup function so tests don't have to touch the real environment.
    pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("DB_SQL_FILE").filter(|v| !v.is_empty()) {
            config.database.path = PathBuf::from(path);
        }
        if let Some(table) = lookup("MIGRATIONS_TABLE").filter(|v| !v.is_empty()) {
            config.migrations.table = table;
        }
        if let Some(dir) = lookup("MIGRATIONS_DIR").filter(|v| !v.is_empty()) {
            config.migrations.directory = PathBuf::from(dir);
        }
        if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.is_empty()) {
            config.log_level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::load(&dir.path().join("tidemark.yml")).unwrap();
        assert_eq!(config.migrations.table, "migrations");
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn loads_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.yml");
        std::fs::write(
            &path,
            "database:\n  path: /tmp/app.db\nmigrations:\n  table: schema_history\n",
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/app.db"));
        assert!(config.database.foreign_keys);
        assert_eq!(config.migrations.table, "schema_history");
        assert_eq!(
            config.migrations.directory,
            PathBuf::from("database/migrations")
        );
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\n[database]\nbusy_timeout_ms = 250\n",
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.database.busy_timeout_ms, 250);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.ini");
        std::fs::write(&path, "x=1").unwrap();

        let err = ConfigLoader::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("DB_SQL_FILE", "/var/lib/app.db"),
            ("MIGRATIONS_TABLE", "ledger"),
            ("LOG_LEVEL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        ConfigLoader::apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/var/lib/app.db"));
        assert_eq!(config.migrations.table, "ledger");
        // empty values are ignored
        assert_eq!(config.log_level, "info");
    }
}
