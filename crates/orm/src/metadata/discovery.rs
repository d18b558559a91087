//! Convention-based association discovery
//!
//! Runs once per database over the introspected columns of every mapped
//! table plus the columns of tables no entity maps. Nothing here reads
//! database constraints: a table is related to another when it carries a
//! column named after the other's conventional foreign key.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{OrmError, OrmResult};
use crate::inflector;

use super::associations::{push_unique, Association, AssociationOverride};

/// A mapped table as seen by discovery
#[derive(Debug, Clone)]
pub struct EntityShape {
    pub type_name: String,
    pub table: String,
    /// Lower-cased column names
    pub columns: BTreeSet<String>,
}

impl EntityShape {
    pub fn new(type_name: impl Into<String>, table: impl Into<String>, columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            type_name: type_name.into(),
            table: table.into(),
            columns: columns.into_iter().map(|c| c.to_lowercase()).collect(),
        }
    }

    fn fk_name(&self) -> String {
        inflector::foreign_key_for(&self.table)
    }
}

/// A table no entity maps, a candidate join table
#[derive(Debug, Clone)]
pub struct TableShape {
    pub table: String,
    pub columns: BTreeSet<String>,
}

impl TableShape {
    pub fn new(table: impl Into<String>, columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(|c| c.to_lowercase()).collect(),
        }
    }
}

pub type AssociationMap = BTreeMap<String, Vec<Association>>;

/// Infer one-to-many/belongs-to pairs and many-to-many pairs.
pub fn infer(entities: &[EntityShape], unmapped: &[TableShape]) -> AssociationMap {
    let mut found: AssociationMap = entities
        .iter()
        .map(|e| (e.type_name.clone(), Vec::new()))
        .collect();

    for source in entities {
        let fk = source.fk_name();
        for target in entities {
            if target.type_name == source.type_name || !target.columns.contains(&fk) {
                continue;
            }
            let association = Association::OneToMany {
                source: source.type_name.clone(),
                target: target.type_name.clone(),
                fk_name: fk.clone(),
            };
            insert_pair(&mut found, association);
        }
    }

    for join in unmapped {
        for (i, source) in entities.iter().enumerate() {
            let source_fk = source.fk_name();
            if !join.columns.contains(&source_fk) {
                continue;
            }
            for target in &entities[i + 1..] {
                let target_fk = target.fk_name();
                if target.type_name == source.type_name || target_fk == source_fk || !join.columns.contains(&target_fk) {
                    continue;
                }
                let association = Association::ManyToMany {
                    source: source.type_name.clone(),
                    target: target.type_name.clone(),
                    join: join.table.clone(),
                    source_fk: source_fk.clone(),
                    target_fk,
                };
                insert_pair(&mut found, association);
            }
        }
    }

    found
}

/// Resolve declared associations and merge them over the inferred ones.
///
/// A declared association replaces any inferred association of the same
/// kind between the same two types, in both directions.
pub fn apply_overrides(
    found: &mut AssociationMap,
    entities: &[EntityShape],
    overrides: &[(String, AssociationOverride)],
) -> OrmResult<()> {
    let mut declared = Vec::new();
    for (source_type, declaration) in overrides {
        let source = lookup(entities, source_type)?;
        let association = match declaration {
            AssociationOverride::BelongsTo { parent, fk_name } => {
                let parent = lookup(entities, parent)?;
                Association::BelongsTo {
                    source: source.type_name.clone(),
                    target: parent.type_name.clone(),
                    fk_name: fk_name.clone().unwrap_or_else(|| parent.fk_name()),
                }
            }
            AssociationOverride::HasMany { child, fk_name } => {
                let child = lookup(entities, child)?;
                Association::OneToMany {
                    source: source.type_name.clone(),
                    target: child.type_name.clone(),
                    fk_name: fk_name.clone().unwrap_or_else(|| source.fk_name()),
                }
            }
            AssociationOverride::ManyToMany {
                other,
                join,
                source_fk,
                target_fk,
            } => {
                let other = lookup(entities, other)?;
                Association::ManyToMany {
                    source: source.type_name.clone(),
                    target: other.type_name.clone(),
                    join: join.clone(),
                    source_fk: source_fk.to_lowercase(),
                    target_fk: target_fk.to_lowercase(),
                }
            }
            AssociationOverride::BelongsToPolymorphic { parent, type_label } => {
                let parent = lookup(entities, parent)?;
                Association::BelongsToPolymorphic {
                    source: source.type_name.clone(),
                    target: parent.type_name.clone(),
                    type_label: type_label.clone().unwrap_or_else(|| parent.type_name.clone()),
                }
            }
        };
        let reversed = association.reversed();
        push_unique(&mut declared, association);
        push_unique(&mut declared, reversed);
    }

    for associations in found.values_mut() {
        associations.retain(|inferred| {
            !declared.iter().any(|d| {
                d.kind() == inferred.kind() && d.source() == inferred.source() && d.target() == inferred.target()
            })
        });
    }
    for association in declared {
        push_unique(found.entry(association.source().to_string()).or_default(), association);
    }
    Ok(())
}

fn insert_pair(found: &mut AssociationMap, association: Association) {
    let reversed = association.reversed();
    push_unique(found.entry(association.source().to_string()).or_default(), association);
    push_unique(found.entry(reversed.source().to_string()).or_default(), reversed);
}

fn lookup<'a>(entities: &'a [EntityShape], type_name: &str) -> OrmResult<&'a EntityShape> {
    entities.iter().find(|e| e.type_name == type_name).ok_or_else(|| {
        OrmError::Initialization(format!(
            "association declared with '{}', which is not registered in the same database",
            type_name
        ))
    })
}
