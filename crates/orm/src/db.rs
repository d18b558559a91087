//! Query execution core
//!
//! Every statement the engine issues passes through these methods. They
//! reject parameter lists that do not match the statement's placeholders,
//! rewrite placeholders for the connection's dialect, time and log the
//! statement and update the session statistics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backends::{GeneratedKey, RowListener};
use crate::cache::CachedValue;
use crate::connection::statistics::StatementKind;
use crate::connection::Session;
use crate::dialect::count_placeholders;
use crate::error::{OrmError, OrmResult};
use crate::metadata::MetaModel;
use crate::value::{DatabaseValue, RowMap};

const SQL_TARGET: &str = "rowbound::sql";

fn check_parameters(sql: &str, params: &[DatabaseValue]) -> OrmResult<()> {
    let expected = count_placeholders(sql);
    if expected != params.len() {
        return Err(OrmError::IllegalArgument(format!(
            "statement expects {} parameter(s) but {} were supplied: {}",
            expected,
            params.len(),
            sql
        )));
    }
    Ok(())
}

fn as_count(value: Option<DatabaseValue>, sql: &str) -> OrmResult<i64> {
    value
        .as_ref()
        .and_then(DatabaseValue::as_i64)
        .ok_or_else(|| OrmError::Query(format!("count query returned {:?}: {}", value, sql)))
}

impl Session {
    /// First column of the first row, `None` when no row matched.
    pub async fn first_cell(&mut self, db: &str, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<DatabaseValue>> {
        let rows = self.find_all(db, sql, params).await?;
        Ok(rows.into_iter().next().and_then(|row| row.first_value().cloned()))
    }

    /// Materialize every row of a query.
    pub async fn find_all(&mut self, db: &str, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<RowMap>> {
        check_parameters(sql, params)?;
        let handle = self.handle(db)?;
        let prepared = handle.dialect.prepare_sql(sql);
        let started = Instant::now();
        let rows = handle.connection.fetch_all(&prepared, params).await?;
        self.record(StatementKind::Select, db, sql, params, started.elapsed(), rows.len() as u64);
        Ok(rows)
    }

    /// Stream rows into a listener without holding the result set in
    /// memory; returns the number of rows delivered.
    pub async fn find_each(
        &mut self,
        db: &str,
        sql: &str,
        params: &[DatabaseValue],
        listener: &mut dyn RowListener,
    ) -> OrmResult<u64> {
        check_parameters(sql, params)?;
        let handle = self.handle(db)?;
        let prepared = handle.dialect.prepare_sql(sql);
        let started = Instant::now();
        let delivered = handle.connection.fetch_each(&prepared, params, listener).await?;
        self.record(StatementKind::Select, db, sql, params, started.elapsed(), delivered);
        Ok(delivered)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn exec(&mut self, db: &str, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        check_parameters(sql, params)?;
        let handle = self.handle(db)?;
        let prepared = handle.dialect.prepare_sql(sql);
        let started = Instant::now();
        let affected = handle.connection.execute(&prepared, params).await?;
        self.record(StatementKind::Execute, db, sql, params, started.elapsed(), affected);
        Ok(affected)
    }

    /// Execute an INSERT and read back the generated value of `id_name`.
    ///
    /// `None` means the statement did not insert exactly one row;
    /// [`GeneratedKey::Unsupported`] means it did but the driver cannot
    /// report the key.
    pub async fn exec_insert(
        &mut self,
        db: &str,
        sql: &str,
        params: &[DatabaseValue],
        id_name: &str,
    ) -> OrmResult<Option<GeneratedKey>> {
        if !sql.trim_start().to_uppercase().starts_with("INSERT") {
            return Err(OrmError::IllegalArgument(format!("not an INSERT statement: {}", sql)));
        }
        check_parameters(sql, params)?;
        let handle = self.handle(db)?;
        let prepared = handle.dialect.prepare_sql(sql);
        handle.statements.record(&prepared);
        let started = Instant::now();
        let key = handle
            .connection
            .insert_with_generated_key(&prepared, params, id_name)
            .await?;
        let affected = if key.is_some() { 1 } else { 0 };
        self.record(StatementKind::Insert, db, sql, params, started.elapsed(), affected);
        Ok(key)
    }

    /// Run unparametrized SQL, possibly several statements.
    pub async fn exec_batch(&mut self, db: &str, sql: &str) -> OrmResult<u64> {
        let handle = self.handle(db)?;
        let started = Instant::now();
        let affected = handle.connection.execute_batch(sql).await?;
        self.record(StatementKind::Execute, db, sql, &[], started.elapsed(), affected);
        Ok(affected)
    }

    /// `SELECT COUNT(*)` over a table with an optional WHERE fragment.
    pub async fn count_rows(
        &mut self,
        db: &str,
        table: &str,
        where_clause: Option<&str>,
        params: &[DatabaseValue],
    ) -> OrmResult<i64> {
        let sql = self.dialect(db)?.count(table, where_clause);
        let value = self.first_cell(db, &sql, params).await?;
        as_count(value, &sql)
    }

    /// Run a count statement for `meta`, served from and stored into the
    /// query cache when the type is cached.
    pub(crate) async fn cached_count(
        &mut self,
        meta: &MetaModel,
        table: &str,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<i64> {
        let db = meta.db_name().to_string();
        let registry = Arc::clone(self.registry());
        let cacheable = meta.is_cached() && registry.query_cache().is_enabled();
        if cacheable {
            if let Some(CachedValue::Scalar(value)) = registry.query_cache().get(&db, table, sql, params) {
                if let Some(count) = value.as_i64() {
                    self.stats_mut().cache_hits += 1;
                    return Ok(count);
                }
            }
        }
        let value = self.first_cell(&db, sql, params).await?;
        let count = as_count(value, sql)?;
        if cacheable {
            registry
                .query_cache()
                .put(&db, table, sql, params, CachedValue::Scalar(DatabaseValue::Int64(count)));
        }
        Ok(count)
    }

    fn record(&mut self, kind: StatementKind, db: &str, sql: &str, params: &[DatabaseValue], elapsed: Duration, rows: u64) {
        let slow = elapsed >= self.registry().config().slow_query_threshold;
        let millis = elapsed.as_secs_f64() * 1000.0;
        if slow {
            warn!(target: SQL_TARGET, db, kind = kind.as_str(), sql, params = ?params, elapsed_ms = millis, rows, "slow query");
        } else {
            debug!(target: SQL_TARGET, db, kind = kind.as_str(), sql, params = ?params, elapsed_ms = millis, rows);
        }
        self.stats_mut().record(kind, elapsed, slow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;
    use crate::registry::Registry;

    async fn session() -> Session {
        let registry = Registry::builder().build().unwrap();
        let mut session = registry.session();
        session.open("default", "sqlite::memory:").await.unwrap();
        session
            .exec_batch("default", "CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)")
            .await
            .unwrap();
        session.reset_statistics();
        session
    }

    #[tokio::test]
    async fn test_parameter_count_must_match() {
        let mut session = session().await;
        let result = session.find_all("default", "SELECT * FROM people", &params![1]).await;
        assert!(matches!(result, Err(OrmError::IllegalArgument(_))));
        let result = session.exec("default", "DELETE FROM people WHERE id = ?", &[]).await;
        assert!(matches!(result, Err(OrmError::IllegalArgument(_))));
        assert_eq!(session.statistics().queries(), 0);
    }

    #[tokio::test]
    async fn test_insert_and_query() {
        let mut session = session().await;
        let key = session
            .exec_insert("default", "INSERT INTO people (name) VALUES (?)", &params!["Ann"], "id")
            .await
            .unwrap();
        assert_eq!(key, Some(GeneratedKey::Value(DatabaseValue::Int64(1))));
        assert!(session
            .exec_insert("default", "UPDATE people SET name = ?", &params!["Bob"], "id")
            .await
            .is_err());

        let rows = session.find_all("default", "SELECT * FROM people WHERE name = ?", &params!["Ann"]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("NAME"), Some(&DatabaseValue::from("Ann")));
        assert_eq!(session.count_rows("default", "people", None, &[]).await.unwrap(), 1);
        assert_eq!(
            session.first_cell("default", "SELECT name FROM people WHERE id = ?", &params![2]).await.unwrap(),
            None
        );

        let stats = session.statistics();
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.selects, 3);
    }

    #[tokio::test]
    async fn test_driver_errors_carry_statement() {
        let mut session = session().await;
        let err = session
            .exec("default", "INSERT INTO nowhere (x) VALUES (?)", &params![1])
            .await
            .unwrap_err();
        assert!(err.sql().unwrap_or_default().contains("nowhere"));
    }
}
