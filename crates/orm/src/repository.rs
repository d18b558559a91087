//! Repository - table-level operations for one entity type
//!
//! Finders return [`LazyList`]s that run nothing until read. Bulk writes
//! go straight to SQL without loading models or running callbacks, and
//! purge the query cache like any other write.

use std::sync::Arc;

use crate::connection::Session;
use crate::error::{OrmError, OrmResult};
use crate::lazy_list::LazyList;
use crate::metadata::MetaModel;
use crate::model::Model;
use crate::paginator::Paginator;
use crate::value::{DatabaseValue, RowMap};

#[derive(Debug, Clone)]
pub struct Repository {
    meta: Arc<MetaModel>,
}

impl Repository {
    pub fn new(meta: Arc<MetaModel>) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &Arc<MetaModel> {
        &self.meta
    }

    /// A new, unsaved instance
    pub fn create(&self) -> Model {
        Model::new(Arc::clone(&self.meta))
    }

    /// A new, unsaved instance with attributes set
    pub fn from_map<I, K, V>(&self, values: I) -> OrmResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<DatabaseValue>,
    {
        Model::from_map(Arc::clone(&self.meta), values)
    }

    /// Build, validate and insert an instance; validation failures are errors.
    pub async fn create_it<I, K, V>(&self, session: &mut Session, values: I) -> OrmResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<DatabaseValue>,
    {
        let mut model = self.from_map(values)?;
        model.save_it(session).await?;
        Ok(model)
    }

    pub fn find_all(&self) -> LazyList {
        LazyList::new(Arc::clone(&self.meta), "", Vec::new())
    }

    /// Rows matching a WHERE fragment, e.g. `where_("name = ?", params!["Ann"])`
    pub fn where_(&self, subquery: &str, params: Vec<DatabaseValue>) -> LazyList {
        LazyList::new(Arc::clone(&self.meta), subquery, params)
    }

    /// Models from a complete SELECT; the rows must carry this type's columns.
    pub fn find_by_sql(&self, sql: &str, params: Vec<DatabaseValue>) -> OrmResult<LazyList> {
        if !sql.trim_start().to_uppercase().starts_with("SELECT") {
            return Err(OrmError::IllegalArgument(format!("not a SELECT statement: {}", sql)));
        }
        Ok(LazyList::full(Arc::clone(&self.meta), sql, params))
    }

    pub async fn find_by_id(&self, session: &mut Session, id: impl Into<DatabaseValue>) -> OrmResult<Option<Model>> {
        let condition = format!("{} = ?", self.meta.id_name());
        self.find_first(session, &condition, vec![id.into()]).await
    }

    /// Look up a row of a composite-key table by its key values, in key order.
    pub async fn find_by_composite_keys(
        &self,
        session: &mut Session,
        values: Vec<DatabaseValue>,
    ) -> OrmResult<Option<Model>> {
        let keys = self.meta.composite_keys();
        if keys.is_empty() || keys.len() != values.len() {
            return Err(OrmError::IllegalArgument(format!(
                "'{}' has {} composite key column(s) but {} value(s) were given",
                self.meta.table_name(),
                keys.len(),
                values.len()
            )));
        }
        let condition: Vec<String> = keys.iter().map(|k| format!("{} = ?", k)).collect();
        self.find_first(session, &condition.join(" AND "), values).await
    }

    /// First row matching a WHERE fragment
    pub async fn find_first(
        &self,
        session: &mut Session,
        subquery: &str,
        params: Vec<DatabaseValue>,
    ) -> OrmResult<Option<Model>> {
        let mut list = self.where_(subquery, params).limit(1)?;
        Ok(list.first(session).await?.cloned())
    }

    /// First row whose `attribute` equals `value`
    pub async fn find_by(
        &self,
        session: &mut Session,
        attribute: &str,
        value: impl Into<DatabaseValue>,
    ) -> OrmResult<Option<Model>> {
        if !self.meta.has_attribute(attribute) {
            return Err(OrmError::AttributeNotFound {
                attribute: attribute.to_string(),
                table: self.meta.table_name().to_string(),
            });
        }
        self.find_first(session, &format!("{} = ?", attribute), vec![value.into()])
            .await
    }

    /// Stream matching rows as models into `listener` until it returns
    /// false. Nothing is cached and `after_load` hooks do not run.
    pub async fn find_each<F>(
        &self,
        session: &mut Session,
        subquery: &str,
        params: &[DatabaseValue],
        mut listener: F,
    ) -> OrmResult<u64>
    where
        F: FnMut(Model) -> bool + Send,
    {
        self.meta.check_table()?;
        let db = self.meta.db_name().to_string();
        let table = session.table_name(&self.meta);
        let where_clause = (!subquery.trim().is_empty()).then_some(subquery);
        let sql = session.dialect(&db)?.select_star(&table, where_clause);
        let meta = Arc::clone(&self.meta);
        let mut adapter = |row: RowMap| listener(Model::from_row(Arc::clone(&meta), row));
        session.find_each(&db, &sql, params, &mut adapter).await
    }

    /// Rows in the table; cached for cached types.
    pub async fn count(&self, session: &mut Session) -> OrmResult<i64> {
        let db = self.meta.db_name().to_string();
        let table = session.table_name(&self.meta);
        let sql = session.dialect(&db)?.count(&table, None);
        session.cached_count(&self.meta, &table, &sql, &[]).await
    }

    pub async fn count_where(&self, session: &mut Session, subquery: &str, params: &[DatabaseValue]) -> OrmResult<i64> {
        let db = self.meta.db_name().to_string();
        let table = session.table_name(&self.meta);
        session.count_rows(&db, &table, Some(subquery), params).await
    }

    /// Whether a row with this id exists
    pub async fn exists(&self, session: &mut Session, id: impl Into<DatabaseValue>) -> OrmResult<bool> {
        let db = self.meta.db_name().to_string();
        let table = session.table_name(&self.meta);
        let sql = session.dialect(&db)?.exists(&table, self.meta.id_name());
        Ok(session.first_cell(&db, &sql, &[id.into()]).await?.is_some())
    }

    /// Delete matching rows without loading them; returns the row count.
    pub async fn delete_where(&self, session: &mut Session, subquery: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        self.delete_rows(session, Some(subquery), params).await
    }

    pub async fn delete_all(&self, session: &mut Session) -> OrmResult<u64> {
        self.delete_rows(session, None, &[]).await
    }

    /// `UPDATE table SET <updates> [WHERE <conditions>]`; `params` bind the
    /// placeholders of both parts, updates first.
    pub async fn update_where(
        &self,
        session: &mut Session,
        updates: &str,
        conditions: Option<&str>,
        params: &[DatabaseValue],
    ) -> OrmResult<u64> {
        let db = self.meta.db_name().to_string();
        let table = session.table_name(&self.meta);
        let sql = session.dialect(&db)?.update_where(&table, updates, conditions);
        let affected = session.exec(&db, &sql, params).await?;
        session.registry().purge(&db, &table, self.meta.table_name());
        Ok(affected)
    }

    pub fn paginator(&self, page_size: u64, subquery: &str, params: Vec<DatabaseValue>) -> OrmResult<Paginator> {
        Paginator::new(Arc::clone(&self.meta), page_size, subquery, params)
    }

    async fn delete_rows(&self, session: &mut Session, conditions: Option<&str>, params: &[DatabaseValue]) -> OrmResult<u64> {
        let db = self.meta.db_name().to_string();
        let table = session.table_name(&self.meta);
        let sql = session.dialect(&db)?.delete_where(&table, conditions);
        let affected = session.exec(&db, &sql, params).await?;
        session.registry().purge(&db, &table, self.meta.table_name());
        Ok(affected)
    }
}
