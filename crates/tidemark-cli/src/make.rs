use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use tracing::info;

const TEMPLATE: &str = "-- up\n\n\n-- down\n\n";

/// `AddLinksTable`, `add links-table` and `add_links_table` all become `add_links_table`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut after_lower = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && after_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            after_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            after_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// `<YYYY_MM_DD_HHMMSS>_<snake_name>.sql`, so files sort in creation order.
pub fn file_name(name: &str, now: NaiveDateTime) -> Result<String> {
    let slug = snake_case(name);
    if slug.is_empty() {
        bail!("migration name {name:?} has no letters or digits");
    }
    Ok(format!("{}_{slug}.sql", now.format("%Y_%m_%d_%H%M%S")))
}

/// Write an empty up/down migration into `dir`. Never overwrites an existing file.
pub fn create_migration(dir: &Path, name: &str, now: NaiveDateTime) -> Result<PathBuf> {
    let path = dir.join(file_name(name, now)?);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            bail!("{} already exists", path.display())
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to create {}", path.display()));
        }
    };
    file.write_all(TEMPLATE.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!("created migration {}", path.display());
    Ok(path)
}
