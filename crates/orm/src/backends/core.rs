//! Core Database Backend Traits
//!
//! A [`DatabaseConnection`] is one open driver connection. It executes
//! already-prepared SQL with positional parameters and knows how to
//! introspect its own catalog. Everything above this layer (parameter
//! checks, logging, statistics, caching) lives in the session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::DatabaseBackendType;
use crate::error::OrmResult;
use crate::value::{DatabaseValue, RowMap};

/// Column definition collected from catalog introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub column_name: String,
    pub type_name: String,
    pub column_size: i32,
}

impl ColumnMetadata {
    pub fn new(column_name: impl Into<String>, type_name: impl Into<String>, column_size: i32) -> Self {
        Self {
            column_name: column_name.into(),
            type_name: type_name.into(),
            column_size,
        }
    }
}

/// Receives rows one at a time from a streamed query.
///
/// Returning `false` stops the stream; remaining rows are never fetched.
pub trait RowListener: Send {
    fn next(&mut self, row: RowMap) -> bool;
}

impl<F> RowListener for F
where
    F: FnMut(RowMap) -> bool + Send,
{
    fn next(&mut self, row: RowMap) -> bool {
        self(row)
    }
}

/// Outcome of an insert that asked for the generated primary key
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedKey {
    Value(DatabaseValue),
    /// The driver cannot report generated keys; the row was inserted
    Unsupported,
}

/// Abstract database connection trait
#[async_trait]
pub trait DatabaseConnection: Send {
    fn backend_type(&self) -> DatabaseBackendType;

    /// Product name used to pick a SQL dialect
    fn product_name(&self) -> &str;

    /// Execute a statement and return affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and materialize every row
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<RowMap>>;

    /// Stream rows into a listener; returns the number of rows delivered
    async fn fetch_each(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
        listener: &mut dyn RowListener,
    ) -> OrmResult<u64>;

    /// Execute an insert and read back the generated key of `id_name`.
    ///
    /// Returns `None` when the statement did not affect exactly one row.
    async fn insert_with_generated_key(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
        id_name: &str,
    ) -> OrmResult<Option<GeneratedKey>> {
        let _ = id_name;
        let affected = self.execute(sql, params).await?;
        Ok((affected == 1).then_some(GeneratedKey::Unsupported))
    }

    /// Run unparametrized SQL, possibly several statements
    async fn execute_batch(&mut self, sql: &str) -> OrmResult<u64>;

    /// Column definitions of a table, empty when the table does not exist
    async fn table_columns(&mut self, table: &str) -> OrmResult<Vec<ColumnMetadata>>;

    /// Names of all user tables visible to this connection
    async fn table_names(&mut self) -> OrmResult<Vec<String>>;

    async fn begin(&mut self) -> OrmResult<()> {
        self.execute_batch("BEGIN").await.map(|_| ())
    }

    async fn commit(&mut self) -> OrmResult<()> {
        self.execute_batch("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> OrmResult<()> {
        self.execute_batch("ROLLBACK").await.map(|_| ())
    }

    /// Drop prepared statements cached by the driver
    async fn clear_statement_cache(&mut self) -> OrmResult<()>;

    /// Close the connection
    async fn close(self: Box<Self>) -> OrmResult<()>;
}

/// Split a declared SQL type such as `VARCHAR(56)` into name and size.
pub(crate) fn split_declared_type(declared: &str) -> (String, i32) {
    let declared = declared.trim();
    match declared.find('(') {
        Some(open) => {
            let name = declared[..open].trim().to_uppercase();
            let size = declared[open + 1..]
                .trim_end_matches(')')
                .split(',')
                .next()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0);
            (name, size)
        }
        None => (declared.to_uppercase(), 0),
    }
}
