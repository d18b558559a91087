//! Lazy result lists
//!
//! A [`LazyList`] describes a query and materializes it on first access.
//! Building methods consume and return the list so a query reads as one
//! chain; once materialized the list is fixed and further building fails.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::cache::CachedValue;
use crate::connection::Session;
use crate::dialect::LockMode;
use crate::error::{OrmError, OrmResult};
use crate::loading::eager_load;
use crate::metadata::MetaModel;
use crate::model::{hydrate, Model};
use crate::value::DatabaseValue;

#[derive(Debug, Clone)]
pub struct LazyList {
    meta: Arc<MetaModel>,
    query: String,
    full_query: bool,
    params: Vec<DatabaseValue>,
    order_bys: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    lock: LockMode,
    includes: Option<Vec<String>>,
    models: Option<Arc<Vec<Model>>>,
    shared: bool,
}

impl LazyList {
    /// Rows of the entity's table matching a WHERE fragment
    pub(crate) fn new(meta: Arc<MetaModel>, subquery: impl Into<String>, params: Vec<DatabaseValue>) -> Self {
        Self {
            meta,
            query: subquery.into(),
            full_query: false,
            params,
            order_bys: Vec::new(),
            limit: None,
            offset: None,
            lock: LockMode::None,
            includes: None,
            models: None,
            shared: false,
        }
    }

    /// Rows of a complete SELECT statement
    pub(crate) fn full(meta: Arc<MetaModel>, sql: impl Into<String>, params: Vec<DatabaseValue>) -> Self {
        Self {
            full_query: true,
            ..Self::new(meta, sql, params)
        }
    }

    /// A list that is already materialized
    pub(crate) fn preloaded(meta: Arc<MetaModel>, models: Vec<Model>) -> Self {
        Self {
            models: Some(Arc::new(models)),
            ..Self::new(meta, "", Vec::new())
        }
    }

    pub fn meta(&self) -> &Arc<MetaModel> {
        &self.meta
    }

    pub fn params(&self) -> &[DatabaseValue] {
        &self.params
    }

    pub fn is_loaded(&self) -> bool {
        self.models.is_some()
    }

    pub fn order_by(mut self, order: &str) -> OrmResult<Self> {
        self.check_modifiable("order_by")?;
        self.check_not_full("order_by")?;
        self.order_bys.push(order.to_string());
        Ok(self)
    }

    pub fn limit(mut self, limit: u64) -> OrmResult<Self> {
        self.check_modifiable("limit")?;
        self.check_not_full("limit")?;
        self.limit = Some(limit);
        Ok(self)
    }

    pub fn offset(mut self, offset: u64) -> OrmResult<Self> {
        self.check_modifiable("offset")?;
        self.check_not_full("offset")?;
        self.offset = Some(offset);
        Ok(self)
    }

    /// Lock the selected rows. Locked selects never use the query cache.
    pub fn lock(mut self, mode: LockMode) -> OrmResult<Self> {
        self.check_modifiable("lock")?;
        self.lock = mode;
        Ok(self)
    }

    /// Eager-load the given associated types with one query each.
    pub fn include(mut self, targets: &[&str]) -> OrmResult<Self> {
        self.check_modifiable("include")?;
        if self.includes.is_some() {
            return Err(OrmError::IllegalArgument("include can only be called once per list".to_string()));
        }
        for target in targets {
            if !self.meta.is_associated_with(target) {
                return Err(OrmError::NotAssociated {
                    source_type: self.meta.type_name().to_string(),
                    target_type: target.to_string(),
                });
            }
        }
        self.includes = Some(targets.iter().map(|t| t.to_string()).collect());
        Ok(self)
    }

    /// Paging for a paginator page, allowed on full queries too
    pub(crate) fn page(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Statement this list runs, with `?` placeholders
    pub fn to_sql(&self, session: &Session) -> OrmResult<String> {
        let dialect = session.dialect(self.meta.db_name())?;
        let table = session.table_name(&self.meta);
        let table = (!self.full_query).then_some(table.as_str());
        Ok(dialect.form_select(table, &self.query, &self.order_bys, self.limit, self.offset, self.lock))
    }

    /// Materialize the list if it is not yet, and return its models.
    pub async fn load(&mut self, session: &mut Session) -> OrmResult<&[Model]> {
        self.hydrate(session).await?;
        Ok(self.loaded())
    }

    pub async fn len(&mut self, session: &mut Session) -> OrmResult<usize> {
        Ok(self.load(session).await?.len())
    }

    pub async fn is_empty(&mut self, session: &mut Session) -> OrmResult<bool> {
        Ok(self.load(session).await?.is_empty())
    }

    pub async fn get(&mut self, session: &mut Session, index: usize) -> OrmResult<Option<&Model>> {
        Ok(self.load(session).await?.get(index))
    }

    pub async fn first(&mut self, session: &mut Session) -> OrmResult<Option<&Model>> {
        self.get(session, 0).await
    }

    /// Iterate a materialized list; empty until [`LazyList::load`] ran.
    pub fn iter(&self) -> std::slice::Iter<'_, Model> {
        self.loaded().iter()
    }

    /// Values of one attribute, in list order
    pub async fn collect(&mut self, session: &mut Session, attribute: &str) -> OrmResult<Vec<DatabaseValue>> {
        self.load(session).await?.iter().map(|m| m.get(attribute)).collect()
    }

    /// Distinct values of one attribute, first occurrence first
    pub async fn collect_distinct(&mut self, session: &mut Session, attribute: &str) -> OrmResult<Vec<DatabaseValue>> {
        let values = self.collect(session, attribute).await?;
        let mut seen = HashSet::new();
        Ok(values.into_iter().filter(|v| seen.insert(v.cache_token())).collect())
    }

    pub async fn to_maps(
        &mut self,
        session: &mut Session,
    ) -> OrmResult<Vec<std::collections::BTreeMap<String, DatabaseValue>>> {
        Ok(self.load(session).await?.iter().map(Model::to_map).collect())
    }

    pub async fn to_json(&mut self, session: &mut Session) -> OrmResult<JsonValue> {
        Ok(JsonValue::Array(self.load(session).await?.iter().map(Model::to_json).collect()))
    }

    /// Take the models out of the list. Lists shared with the query cache
    /// hand out copies.
    pub async fn into_models(mut self, session: &mut Session) -> OrmResult<Vec<Model>> {
        self.hydrate(session).await?;
        let models = self.models.take().unwrap_or_default();
        Ok(Arc::try_unwrap(models).unwrap_or_else(|shared| shared.as_ref().clone()))
    }

    /// Mutable access to the models of a list not held by the query cache.
    pub async fn models_mut(&mut self, session: &mut Session) -> OrmResult<&mut [Model]> {
        self.hydrate(session).await?;
        if self.shared {
            return Err(OrmError::IllegalArgument(format!(
                "list of '{}' is shared with the query cache and cannot be modified",
                self.meta.table_name()
            )));
        }
        self.models
            .as_mut()
            .and_then(Arc::get_mut)
            .map(Vec::as_mut_slice)
            .ok_or_else(|| OrmError::IllegalArgument("list is not exclusively owned".to_string()))
    }

    fn loaded(&self) -> &[Model] {
        self.models.as_deref().map(Vec::as_slice).unwrap_or(&[])
    }

    async fn hydrate(&mut self, session: &mut Session) -> OrmResult<()> {
        if self.models.is_some() {
            return Ok(());
        }
        self.meta.check_table()?;
        let registry = Arc::clone(session.registry());
        let db = self.meta.db_name().to_string();
        let table = session.table_name(&self.meta);
        let sql = self.to_sql(session)?;
        let cache_key = match &self.includes {
            Some(includes) => format!("{} /* include {} */", sql, includes.join(",")),
            None => sql.clone(),
        };
        let cacheable = self.meta.is_cached() && self.lock == LockMode::None && registry.query_cache().is_enabled();

        if cacheable {
            if let Some(CachedValue::Models(models)) = registry.query_cache().get(&db, &table, &cache_key, &self.params) {
                session.stats_mut().cache_hits += 1;
                self.models = Some(models);
                self.shared = true;
                return Ok(());
            }
        }

        let rows = session.find_all(&db, &sql, &self.params).await?;
        let mut models = hydrate(&self.meta, rows).await?;
        if let Some(includes) = &self.includes {
            eager_load(session, &self.meta, &mut models, includes).await?;
        }
        let models = Arc::new(models);
        if cacheable {
            registry
                .query_cache()
                .put(&db, &table, &cache_key, &self.params, CachedValue::Models(Arc::clone(&models)));
            self.shared = true;
        }
        self.models = Some(models);
        Ok(())
    }

    fn check_modifiable(&self, operation: &str) -> OrmResult<()> {
        if self.models.is_some() {
            return Err(OrmError::IllegalArgument(format!(
                "cannot call {} on a list that is already loaded",
                operation
            )));
        }
        Ok(())
    }

    fn check_not_full(&self, operation: &str) -> OrmResult<()> {
        if self.full_query {
            return Err(OrmError::IllegalArgument(format!(
                "cannot call {} on a full query; put it in the SQL instead",
                operation
            )));
        }
        Ok(())
    }
}
