//! Model registry file
//!
//! One `<type name>:<logical database>` pair per line. The file lists which
//! entity types belong to which database, so initialization knows what to
//! introspect without being told again at runtime.

use std::path::Path;

use crate::error::{OrmError, OrmResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub type_name: String,
    pub db_name: String,
}

impl RegistryEntry {
    pub fn new(type_name: impl Into<String>, db_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            db_name: db_name.into(),
        }
    }
}

pub fn parse(text: &str) -> OrmResult<Vec<RegistryEntry>> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // type names may themselves contain `::`
        let (type_name, db_name) = line
            .rsplit_once(':')
            .filter(|(t, d)| !t.trim().is_empty() && !d.trim().is_empty() && !t.ends_with(':'))
            .ok_or_else(|| {
                OrmError::Initialization(format!("malformed model registry line {}: '{}'", number + 1, line))
            })?;
        entries.push(RegistryEntry::new(type_name.trim(), db_name.trim()));
    }
    Ok(entries)
}

pub fn render(entries: &[RegistryEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}:{}\n", e.type_name, e.db_name))
        .collect()
}

pub fn read(path: &Path) -> OrmResult<Vec<RegistryEntry>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| OrmError::Initialization(format!("cannot read model registry {}: {}", path.display(), e)))?;
    parse(&text)
}

pub fn write(path: &Path, entries: &[RegistryEntry]) -> OrmResult<()> {
    std::fs::write(path, render(entries))?;
    Ok(())
}
