//! Page-at-a-time access to a query

use std::sync::Arc;

use crate::connection::Session;
use crate::error::{OrmError, OrmResult};
use crate::lazy_list::LazyList;
use crate::metadata::MetaModel;
use crate::value::DatabaseValue;

/// Pages over a WHERE fragment, a full SELECT, or `"*"` for every row.
/// Pages are numbered from 1.
///
/// Counts are taken afresh on every call so rows added while paging show
/// up in [`Paginator::page_count`]; [`Paginator::suppress_counts`] counts
/// once and reuses the figure. Counts of cached types go through the
/// query cache either way.
#[derive(Debug, Clone)]
pub struct Paginator {
    meta: Arc<MetaModel>,
    page_size: u64,
    query: String,
    full_query: bool,
    params: Vec<DatabaseValue>,
    order_bys: Vec<String>,
    count_expression: Option<String>,
    suppress_counts: bool,
    current_page: u64,
    count: Option<i64>,
}

impl Paginator {
    pub fn new(
        meta: Arc<MetaModel>,
        page_size: u64,
        query: impl Into<String>,
        params: Vec<DatabaseValue>,
    ) -> OrmResult<Self> {
        if page_size == 0 {
            return Err(OrmError::IllegalArgument("page size must be at least 1".to_string()));
        }
        let mut query = query.into();
        if query.trim() == "*" {
            if !params.is_empty() {
                return Err(OrmError::IllegalArgument(
                    "query '*' selects every row and takes no parameters".to_string(),
                ));
            }
            query.clear();
        }
        let full_query = query.trim_start().to_ascii_uppercase().starts_with("SELECT ");
        Ok(Self {
            meta,
            page_size,
            query,
            full_query,
            params,
            order_bys: Vec::new(),
            count_expression: None,
            suppress_counts: false,
            current_page: 0,
            count: None,
        })
    }

    pub fn order_by(mut self, order: &str) -> OrmResult<Self> {
        if self.full_query {
            return Err(OrmError::IllegalArgument(
                "cannot add ordering to a full query; put it in the SQL instead".to_string(),
            ));
        }
        self.order_bys.push(order.to_string());
        Ok(self)
    }

    /// Count with `COUNT(<expression>)` instead of `COUNT(*)`, e.g.
    /// `DISTINCT people.id` when a full query joins rows in.
    pub fn count_expression(mut self, expression: &str) -> Self {
        self.count_expression = Some(expression.to_string());
        self
    }

    /// Count once and reuse the figure for the life of the paginator.
    pub fn suppress_counts(mut self, suppress: bool) -> Self {
        self.suppress_counts = suppress;
        self
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Last page requested through [`Paginator::get_page`]; 0 before that
    pub fn current_page(&self) -> u64 {
        self.current_page
    }

    /// Rows of page `page`
    pub fn get_page(&mut self, page: u64) -> OrmResult<LazyList> {
        if page < 1 {
            return Err(OrmError::IllegalArgument("page numbers start at 1".to_string()));
        }
        self.current_page = page;
        let offset = (page - 1) * self.page_size;
        let list = if self.full_query {
            LazyList::full(Arc::clone(&self.meta), self.query.clone(), self.params.clone())
        } else {
            let mut list = LazyList::new(Arc::clone(&self.meta), self.query.clone(), self.params.clone());
            for order in &self.order_bys {
                list = list.order_by(order)?;
            }
            list
        };
        Ok(list.page(self.page_size, offset))
    }

    /// Rows matched by the query
    pub async fn get_count(&mut self, session: &mut Session) -> OrmResult<i64> {
        if self.suppress_counts {
            if let Some(count) = self.count {
                return Ok(count);
            }
        }
        let db = self.meta.db_name().to_string();
        let table = session.table_name(&self.meta);
        let expression = self.count_expression.as_deref().unwrap_or("*");
        let sql = session
            .dialect(&db)?
            .paginator_count(self.full_query, &self.query, &table, expression);
        let count = session.cached_count(&self.meta, &table, &sql, &self.params).await?;
        self.count = Some(count);
        Ok(count)
    }

    pub async fn page_count(&mut self, session: &mut Session) -> OrmResult<u64> {
        let count = self.get_count(session).await?.max(0) as u64;
        Ok(count.div_ceil(self.page_size))
    }

    pub async fn has_next(&mut self, session: &mut Session) -> OrmResult<bool> {
        Ok(self.current_page < self.page_count(session).await?)
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }
}
