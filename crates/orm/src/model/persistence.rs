//! Save, insert, update and delete
//!
//! Every successful write purges the query cache for the written table
//! and its dependents. None of these operations opens a transaction; a
//! failure halfway through a cascade leaves the rows already deleted.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::backends::GeneratedKey;
use crate::connection::Session;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{Association, MetaModel};
use crate::value::DatabaseValue;

use super::callbacks::{self, Hook};
use super::{hydrate, Model};

const CREATED_AT: &str = "created_at";
const UPDATED_AT: &str = "updated_at";

impl Model {
    /// Validate, then insert a new instance or update a persisted one.
    ///
    /// Returns `Ok(false)` when validation failed (see [`Model::errors`])
    /// or when an unversioned update matched no row.
    pub async fn save(&mut self, session: &mut Session) -> OrmResult<bool> {
        self.ensure_not_frozen()?;
        self.meta.check_table()?;
        callbacks::trigger(self, Hook::BeforeSave).await?;
        if !self.is_valid().await? {
            return Ok(false);
        }
        let saved = if self.is_new() {
            self.insert(session).await?
        } else {
            self.update(session).await?
        };
        if saved {
            callbacks::trigger(self, Hook::AfterSave).await?;
        }
        Ok(saved)
    }

    /// Like [`Model::save`], but a validation failure is an error.
    pub async fn save_it(&mut self, session: &mut Session) -> OrmResult<bool> {
        let saved = self.save(session).await?;
        if !saved && !self.errors.is_empty() {
            return Err(OrmError::Validation(self.errors.clone()));
        }
        Ok(saved)
    }

    /// Insert every non-null attribute as a new row.
    ///
    /// The primary key is read back from the database unless it was set
    /// beforehand. A versioned row starts at version 1.
    pub async fn insert(&mut self, session: &mut Session) -> OrmResult<bool> {
        self.ensure_not_frozen()?;
        self.meta.check_table()?;
        callbacks::trigger(self, Hook::BeforeCreate).await?;

        let meta = Arc::clone(&self.meta);
        let db = meta.db_name().to_string();
        let table = session.table_name(&meta);

        if session.registry().config().manage_timestamps {
            let now = DatabaseValue::DateTime(Utc::now());
            for column in [CREATED_AT, UPDATED_AT] {
                if meta.has_attribute(column) {
                    self.put_raw(column, now.clone());
                }
            }
        }

        let version_column = meta.version_column().map(str::to_lowercase);
        let (columns, params): (Vec<String>, Vec<DatabaseValue>) = self
            .attributes
            .iter()
            .filter(|(name, value)| !value.is_null() && Some(name.as_str()) != version_column.as_deref())
            .map(|(name, value)| (name.clone(), value.clone()))
            .unzip();
        let sql = session.dialect(&db)?.insert(&table, &columns, version_column.as_deref());

        let inserted = if meta.has_composite_keys() || self.id().is_some() {
            session.exec(&db, &sql, &params).await? == 1
        } else {
            match session.exec_insert(&db, &sql, &params, meta.id_name()).await? {
                Some(GeneratedKey::Value(id)) => {
                    self.put_raw(meta.id_name(), id);
                    true
                }
                Some(GeneratedKey::Unsupported) => {
                    warn!(table = %table, "driver did not report a generated key");
                    true
                }
                None => false,
            }
        };
        if !inserted {
            return Ok(false);
        }

        if let Some(version) = version_column {
            self.put_raw(&version, DatabaseValue::Int64(1));
        }
        self.mark_clean();
        purge(session, &meta, &table);
        callbacks::trigger(self, Hook::AfterCreate).await?;
        Ok(true)
    }

    /// Write the dirty attributes of a persisted instance.
    ///
    /// Partition columns join the key in the WHERE clause. A versioned
    /// instance also matches on its current version and increments it;
    /// matching no row is then a [`OrmError::StaleModel`].
    pub async fn update(&mut self, session: &mut Session) -> OrmResult<bool> {
        self.ensure_not_frozen()?;
        self.meta.check_table()?;
        if self.is_new() {
            return Err(OrmError::IllegalArgument(format!(
                "cannot update a new instance of '{}'",
                self.meta.table_name()
            )));
        }
        if self.dirty.is_empty() {
            return Ok(true);
        }
        callbacks::trigger(self, Hook::BeforeUpdate).await?;

        let meta = Arc::clone(&self.meta);
        let db = meta.db_name().to_string();
        let table = session.table_name(&meta);

        if session.registry().config().manage_timestamps && meta.has_attribute(UPDATED_AT) {
            self.put_raw(UPDATED_AT, DatabaseValue::DateTime(Utc::now()));
            self.dirty.insert(UPDATED_AT.to_string());
        }

        let keys: Vec<String> = meta.key_columns().iter().map(|k| k.to_lowercase()).collect();
        let version_column = meta.version_column().map(str::to_lowercase);
        let mut set_columns: Vec<String> = self
            .dirty
            .iter()
            .filter(|name| {
                meta.has_attribute(name)
                    && name.as_str() != CREATED_AT
                    && (meta.has_composite_keys() || !keys.contains(*name))
                    && Some(name.as_str()) != version_column.as_deref()
            })
            .cloned()
            .collect();
        let mut params: Vec<DatabaseValue> = set_columns
            .iter()
            .map(|name| self.attributes.get(name).cloned().unwrap_or(DatabaseValue::Null))
            .collect();

        let mut where_columns = meta.key_columns();
        let mut where_params = self.key_values()?;
        for column in meta.partition_columns() {
            where_columns.push(column.clone());
            where_params.push(self.attributes.get(&column.to_lowercase()).cloned().unwrap_or(DatabaseValue::Null));
        }

        let current_version = match &version_column {
            Some(column) => {
                let current = self.attributes.get(column).and_then(DatabaseValue::as_i64).ok_or_else(|| {
                    OrmError::IllegalArgument(format!("versioned instance of '{}' has no {}", table, column))
                })?;
                set_columns.push(column.clone());
                params.push(DatabaseValue::Int64(current + 1));
                where_columns.push(column.clone());
                where_params.push(DatabaseValue::Int64(current));
                Some(current)
            }
            None => None,
        };

        if set_columns.is_empty() {
            self.dirty.clear();
            return Ok(true);
        }

        params.extend(where_params);
        let sql = session.dialect(&db)?.update(&table, &set_columns, &where_columns);
        let affected = session.exec(&db, &sql, &params).await?;

        if affected == 0 {
            return match current_version {
                Some(version) => Err(OrmError::StaleModel {
                    table,
                    id: self.identity(),
                    version,
                }),
                None => Ok(false),
            };
        }

        if let (Some(version), Some(column)) = (current_version, version_column) {
            self.put_raw(&column, DatabaseValue::Int64(version + 1));
        }
        self.mark_clean();
        purge(session, &meta, &table);
        callbacks::trigger(self, Hook::AfterUpdate).await?;
        Ok(true)
    }

    /// Delete the row matching the key and partition columns, then freeze.
    pub async fn delete(&mut self, session: &mut Session) -> OrmResult<bool> {
        self.ensure_not_frozen()?;
        self.meta.check_table()?;
        callbacks::trigger(self, Hook::BeforeDelete).await?;

        let meta = Arc::clone(&self.meta);
        let db = meta.db_name().to_string();
        let table = session.table_name(&meta);

        let mut columns = meta.key_columns();
        let mut params = self.key_values()?;
        for column in meta.partition_columns() {
            columns.push(column.clone());
            params.push(self.attributes.get(&column.to_lowercase()).cloned().unwrap_or(DatabaseValue::Null));
        }
        let sql = session.dialect(&db)?.delete_by_keys(&table, &columns);
        if session.exec(&db, &sql, &params).await? != 1 {
            return Ok(false);
        }

        self.freeze();
        purge(session, &meta, &table);
        callbacks::trigger(self, Hook::AfterDelete).await?;
        Ok(true)
    }

    /// Delete this instance and, recursively, everything reachable through
    /// one-to-many, polymorphic and many-to-many associations.
    ///
    /// Many-to-many edges are followed too, so rows that are only related
    /// through a shared partner are deleted as well. Children are matched
    /// on a single id column, so a composite-key instance with associations
    /// to follow is an [`OrmError::IllegalArgument`].
    pub async fn delete_cascade(&mut self, session: &mut Session) -> OrmResult<()> {
        self.delete_cascade_except(session, &[]).await
    }

    /// [`Model::delete_cascade`] that does not follow the given associations.
    pub async fn delete_cascade_except(&mut self, session: &mut Session, excluded: &[Association]) -> OrmResult<()> {
        self.ensure_not_frozen()?;
        let mut visited = HashSet::new();
        cascade(self, session, excluded, &mut visited, 0).await
    }

    /// Delete immediate children and join rows, then this instance. Nothing
    /// below the immediate children is touched.
    pub async fn delete_cascade_shallow(&mut self, session: &mut Session) -> OrmResult<()> {
        self.ensure_not_frozen()?;
        let meta = Arc::clone(&self.meta);
        let db = meta.db_name().to_string();
        let dialect = session.dialect(&db)?;
        let followed = meta.associations().iter().any(Association::is_child_side);
        let id = if followed { cascade_key(self)? } else { DatabaseValue::Null };

        for association in meta.associations() {
            match association {
                Association::OneToMany { target, fk_name, .. } => {
                    let target_meta = session.metamodel(target).await?;
                    let target_table = session.table_name(&target_meta);
                    let sql = dialect.delete_children_shallow(&target_table, fk_name);
                    session.exec(&db, &sql, &[id.clone()]).await?;
                    purge(session, &target_meta, &target_table);
                }
                Association::OneToManyPolymorphic { target, type_label, .. } => {
                    let target_meta = session.metamodel(target).await?;
                    let target_table = session.table_name(&target_meta);
                    let sql = dialect.delete_polymorphic_children(&target_table);
                    session
                        .exec(&db, &sql, &[id.clone(), DatabaseValue::from(type_label.as_str())])
                        .await?;
                    purge(session, &target_meta, &target_table);
                }
                Association::ManyToMany { join, source_fk, .. } => {
                    let sql = dialect.delete_join_rows(join, source_fk);
                    session.exec(&db, &sql, &[id.clone()]).await?;
                    session.registry().purge(&db, join, join);
                }
                Association::BelongsTo { .. } | Association::BelongsToPolymorphic { .. } => {}
            }
        }
        self.delete(session).await?;
        Ok(())
    }

    /// Reload attributes from the database; `false` when the row is gone.
    pub async fn refresh(&mut self, session: &mut Session) -> OrmResult<bool> {
        self.ensure_not_frozen()?;
        let meta = Arc::clone(&self.meta);
        let db = meta.db_name().to_string();
        let table = session.table_name(&meta);
        let keys = meta.key_columns();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let sql = session.dialect(&db)?.select_star_parametrized(&table, &key_refs);
        let params = self.key_values()?;
        match session.find_all(&db, &sql, &params).await?.into_iter().next() {
            Some(row) => {
                self.replace_attributes(row);
                self.persisted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether a row with this instance's key exists
    pub async fn exists(&self, session: &mut Session) -> OrmResult<bool> {
        let Ok(params) = self.key_values() else {
            return Ok(false);
        };
        let db = self.meta.db_name();
        let table = session.table_name(&self.meta);
        let conditions: Vec<String> = self.meta.key_columns().iter().map(|k| format!("{} = ?", k)).collect();
        let count = session
            .count_rows(db, &table, Some(&conditions.join(" AND ")), &params)
            .await?;
        Ok(count > 0)
    }
}

/// Purge cached results made stale by a write to `table`.
pub(crate) fn purge(session: &Session, meta: &MetaModel, table: &str) {
    session.registry().purge(meta.db_name(), table, meta.table_name());
}

/// Value child rows reference this instance by
fn cascade_key(model: &Model) -> OrmResult<DatabaseValue> {
    if model.meta.has_composite_keys() {
        return Err(OrmError::IllegalArgument(format!(
            "cannot cascade from '{}': children are matched on a single id and the table has a composite key",
            model.meta.table_name()
        )));
    }
    model
        .key_values()?
        .into_iter()
        .next()
        .ok_or_else(|| OrmError::IllegalArgument(format!("'{}' has no key value", model.meta.table_name())))
}

fn cascade<'a>(
    model: &'a mut Model,
    session: &'a mut Session,
    excluded: &'a [Association],
    visited: &'a mut HashSet<(String, String)>,
    depth: usize,
) -> BoxFuture<'a, OrmResult<()>> {
    Box::pin(async move {
        let limit = session.registry().config().cascade_depth;
        if depth > limit {
            return Err(OrmError::IllegalArgument(format!(
                "cascade delete from '{}' exceeded the depth limit of {}",
                model.meta.table_name(),
                limit
            )));
        }
        if !visited.insert((model.meta.table_name().to_lowercase(), model.identity())) {
            return Ok(());
        }

        let meta = Arc::clone(&model.meta);
        let db = meta.db_name().to_string();
        let dialect = session.dialect(&db)?;
        let followed: Vec<&Association> = meta
            .associations()
            .iter()
            .filter(|a| a.is_child_side() && !excluded.contains(*a))
            .collect();
        let id = if followed.is_empty() { DatabaseValue::Null } else { cascade_key(model)? };

        for association in followed {
            let (target_meta, sql, params) = match association {
                Association::OneToMany { target, fk_name, .. } => {
                    let target_meta = session.metamodel(target).await?;
                    let target_table = session.table_name(&target_meta);
                    let sql = dialect.select_star(&target_table, Some(&format!("{} = ?", fk_name)));
                    (target_meta, sql, vec![id.clone()])
                }
                Association::OneToManyPolymorphic { target, type_label, .. } => {
                    let target_meta = session.metamodel(target).await?;
                    let target_table = session.table_name(&target_meta);
                    let sql = dialect.select_star(&target_table, Some("parent_id = ? AND parent_type = ?"));
                    (target_meta, sql, vec![id.clone(), DatabaseValue::from(type_label.as_str())])
                }
                Association::ManyToMany {
                    target,
                    join,
                    source_fk,
                    target_fk,
                    ..
                } => {
                    let target_meta = session.metamodel(target).await?;
                    let target_table = session.table_name(&target_meta);
                    let sql = dialect.select_many_to_many_for(
                        &target_table,
                        join,
                        target_meta.id_name(),
                        target_fk,
                        source_fk,
                    );
                    let partners = session.find_all(&db, &sql, &[id.clone()]).await?;
                    let delete_joins = dialect.delete_join_rows(join, source_fk);
                    session.exec(&db, &delete_joins, &[id.clone()]).await?;
                    session.registry().purge(&db, join, join);
                    let mut partners = hydrate(&target_meta, partners).await?;
                    for partner in partners.iter_mut() {
                        cascade(partner, session, excluded, visited, depth + 1).await?;
                    }
                    continue;
                }
                Association::BelongsTo { .. } | Association::BelongsToPolymorphic { .. } => continue,
            };

            let rows = session.find_all(&db, &sql, &params).await?;
            let mut children = hydrate(&target_meta, rows).await?;
            debug!(
                from = meta.table_name(),
                to = target_meta.table_name(),
                count = children.len(),
                "cascading delete"
            );
            for child in children.iter_mut() {
                cascade(child, session, excluded, visited, depth + 1).await?;
            }
        }

        if !model.is_frozen() {
            model.delete(session).await?;
        }
        Ok(())
    })
}
