//! Static metadata snapshots
//!
//! A snapshot is a JSON array with one object per entity type holding
//! everything initialization would otherwise read from the catalog, so a
//! database can be initialized without a live connection.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backends::ColumnMetadata;
use crate::error::{OrmError, OrmResult};

use super::{Association, MetaModel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub type_name: String,
    pub table_name: String,
    pub db_type: String,
    pub db_name: String,
    pub columns: BTreeMap<String, ColumnMetadata>,
    #[serde(default)]
    pub associations: Vec<Association>,
}

impl SnapshotEntry {
    pub fn from_meta(meta: &MetaModel) -> Self {
        Self {
            type_name: meta.type_name().to_string(),
            table_name: meta.table_name().to_string(),
            db_type: meta.db_type().to_string(),
            db_name: meta.db_name().to_string(),
            columns: meta
                .columns()
                .map(|c| (c.column_name.to_lowercase(), c.clone()))
                .collect(),
            associations: meta.associations().to_vec(),
        }
    }
}

pub fn to_json(entries: &[SnapshotEntry]) -> OrmResult<String> {
    Ok(serde_json::to_string_pretty(entries)?)
}

/// Parse a snapshot; anything malformed is an initialization failure.
pub fn from_json(json: &str) -> OrmResult<Vec<SnapshotEntry>> {
    serde_json::from_str(json).map_err(|e| OrmError::Initialization(format!("malformed static metadata: {}", e)))
}

pub fn read(path: &Path) -> OrmResult<Vec<SnapshotEntry>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| OrmError::Initialization(format!("cannot read static metadata {}: {}", path.display(), e)))?;
    from_json(&json)
}

pub fn write(path: &Path, entries: &[SnapshotEntry]) -> OrmResult<()> {
    std::fs::write(path, to_json(entries)?)?;
    Ok(())
}
