//! Eager loading
//!
//! Attaches parents and children to a materialized list of models with one
//! query per included association, whatever the size of the list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::connection::Session;
use crate::dialect::{placeholders, PARENT_RECORD_ALIAS};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{Association, MetaModel};
use crate::model::{hydrate, Model};
use crate::value::{DatabaseValue, RowMap};

pub(crate) async fn eager_load(
    session: &mut Session,
    meta: &Arc<MetaModel>,
    models: &mut [Model],
    includes: &[String],
) -> OrmResult<()> {
    if models.is_empty() {
        return Ok(());
    }
    for target in includes {
        let association = meta.association_to(target).cloned().ok_or_else(|| OrmError::NotAssociated {
            source_type: meta.type_name().to_string(),
            target_type: target.clone(),
        })?;
        let target_meta = session.metamodel(target).await?;
        match association {
            Association::BelongsTo { fk_name, .. } => {
                load_parents(session, &target_meta, models, &fk_name, None).await?;
            }
            Association::BelongsToPolymorphic { type_label, .. } => {
                load_parents(session, &target_meta, models, "parent_id", Some(&type_label)).await?;
            }
            Association::OneToMany { fk_name, .. } => {
                load_children(session, &target_meta, models, &fk_name, None).await?;
            }
            Association::OneToManyPolymorphic { type_label, .. } => {
                load_children(session, &target_meta, models, "parent_id", Some(&type_label)).await?;
            }
            Association::ManyToMany {
                join,
                source_fk,
                target_fk,
                ..
            } => {
                load_partners(session, &target_meta, models, &join, &source_fk, &target_fk).await?;
            }
        }
    }
    Ok(())
}

/// Distinct non-null values in first-seen order
fn distinct(values: impl Iterator<Item = DatabaseValue>) -> Vec<DatabaseValue> {
    let mut seen = HashSet::new();
    values.filter(|v| !v.is_null() && seen.insert(v.key())).collect()
}

fn label_matches(model: &Model, type_label: Option<&str>) -> bool {
    match type_label {
        Some(label) => model.attribute("parent_type").and_then(DatabaseValue::as_str) == Some(label),
        None => true,
    }
}

async fn load_parents(
    session: &mut Session,
    target_meta: &Arc<MetaModel>,
    models: &mut [Model],
    fk_name: &str,
    type_label: Option<&str>,
) -> OrmResult<()> {
    let ids = distinct(
        models
            .iter()
            .filter(|m| label_matches(m, type_label))
            .filter_map(|m| m.attribute(fk_name).cloned()),
    );
    if ids.is_empty() {
        return Ok(());
    }

    let db = target_meta.db_name().to_string();
    let table = session.table_name(target_meta);
    let condition = format!("{} IN ({})", target_meta.id_name(), placeholders(ids.len()));
    let sql = session.dialect(&db)?.select_star(&table, Some(&condition));
    let rows = session.find_all(&db, &sql, &ids).await?;
    let parents: HashMap<String, Model> = hydrate(target_meta, rows)
        .await?
        .into_iter()
        .filter_map(|parent| parent.id().map(DatabaseValue::key).map(|key| (key, parent)))
        .collect();
    debug!(entity = target_meta.type_name(), count = parents.len(), "eager-loaded parents");

    for model in models.iter_mut().filter(|m| label_matches(m, type_label)) {
        let parent = model
            .attribute(fk_name)
            .and_then(|fk| parents.get(&fk.key()))
            .cloned();
        if let Some(parent) = parent {
            model.set_cached_parent(target_meta.type_name(), parent);
        }
    }
    Ok(())
}

async fn load_children(
    session: &mut Session,
    target_meta: &Arc<MetaModel>,
    models: &mut [Model],
    fk_name: &str,
    type_label: Option<&str>,
) -> OrmResult<()> {
    let ids = distinct(models.iter().filter_map(|m| m.id().cloned()));
    if ids.is_empty() {
        return Ok(());
    }

    let db = target_meta.db_name().to_string();
    let table = session.table_name(target_meta);
    let mut params = Vec::with_capacity(ids.len() + 1);
    let condition = match type_label {
        Some(label) => {
            params.push(DatabaseValue::from(label));
            format!("parent_type = ? AND {} IN ({})", fk_name, placeholders(ids.len()))
        }
        None => format!("{} IN ({})", fk_name, placeholders(ids.len())),
    };
    params.extend(ids);
    let sql = session.dialect(&db)?.select_star(&table, Some(&condition));
    let rows = session.find_all(&db, &sql, &params).await?;

    let mut grouped: HashMap<String, Vec<Model>> = HashMap::new();
    for child in hydrate(target_meta, rows).await? {
        if let Some(key) = child.attribute(fk_name).map(DatabaseValue::key) {
            grouped.entry(key).or_default().push(child);
        }
    }
    debug!(entity = target_meta.type_name(), parents = grouped.len(), "eager-loaded children");

    for model in models.iter_mut() {
        let children = model
            .id()
            .and_then(|id| grouped.get(&id.key()))
            .cloned()
            .unwrap_or_default();
        model.set_cached_children(target_meta.type_name(), children);
    }
    Ok(())
}

async fn load_partners(
    session: &mut Session,
    target_meta: &Arc<MetaModel>,
    models: &mut [Model],
    join: &str,
    source_fk: &str,
    target_fk: &str,
) -> OrmResult<()> {
    let ids = distinct(models.iter().filter_map(|m| m.id().cloned()));
    if ids.is_empty() {
        return Ok(());
    }

    let db = target_meta.db_name().to_string();
    let table = session.table_name(target_meta);
    let sql = session.dialect(&db)?.select_many_to_many(
        &table,
        source_fk,
        join,
        target_meta.id_name(),
        target_fk,
        ids.len(),
    );
    let rows = session.find_all(&db, &sql, &ids).await?;

    let mut owners = Vec::with_capacity(rows.len());
    let mut stripped = Vec::with_capacity(rows.len());
    for row in rows {
        owners.push(row.get(PARENT_RECORD_ALIAS).map(DatabaseValue::key));
        let row: RowMap = row
            .into_iter_pairs()
            .filter(|(column, _)| !column.eq_ignore_ascii_case(PARENT_RECORD_ALIAS))
            .collect();
        stripped.push(row);
    }

    let mut grouped: HashMap<String, Vec<Model>> = HashMap::new();
    for (owner, partner) in owners.into_iter().zip(hydrate(target_meta, stripped).await?) {
        if let Some(owner) = owner {
            grouped.entry(owner).or_default().push(partner);
        }
    }

    for model in models.iter_mut() {
        let partners = model
            .id()
            .and_then(|id| grouped.get(&id.key()))
            .cloned()
            .unwrap_or_default();
        model.set_cached_children(target_meta.type_name(), partners);
    }
    Ok(())
}
