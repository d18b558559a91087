//! SQLite Backend Implementation
//!
//! Single-connection SQLite driver on top of sqlx. Values are decoded by
//! their runtime storage class, so timestamps written as text come back
//! as strings.

use std::str::FromStr;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row, Sqlite, TypeInfo, ValueRef};

use super::core::*;
use super::DatabaseBackendType;
use crate::error::{OrmError, OrmResult};
use crate::value::{DatabaseValue, RowMap};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite connection wrapper
pub struct SqliteConnection {
    conn: sqlx::SqliteConnection,
}

impl SqliteConnection {
    pub async fn connect(database_url: &str) -> OrmResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| OrmError::Initialization(format!("Invalid SQLite URL '{}': {}", database_url, e)))?;
        let conn = options
            .connect()
            .await
            .map_err(|e| OrmError::Initialization(format!("Failed to open SQLite database: {}", e)))?;
        tracing::debug!("Opened SQLite connection to {}", database_url);
        Ok(Self { conn })
    }

    /// Wrap an already open sqlx connection
    pub fn from_sqlx(conn: sqlx::SqliteConnection) -> Self {
        Self { conn }
    }
}

fn build_query<'q>(sql: &'q str, params: &[DatabaseValue], persistent: bool) -> SqliteQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql).persistent(persistent), bind_database_value)
}

/// Bind a DatabaseValue to a SQLite query
fn bind_database_value<'q>(query: SqliteQuery<'q>, value: &DatabaseValue) -> SqliteQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float32(f) => query.bind(*f),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(u.to_string()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Time(t) => query.bind(*t),
        DatabaseValue::Json(j) => query.bind(j.to_string()),
    }
}

/// Convert a SQLite column value to DatabaseValue
fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| OrmError::Query(format!("Failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let storage_class = raw.type_info().name().to_string();

    let decoded = match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get_unchecked::<i64, _>(index).map(DatabaseValue::Int64),
        "REAL" => row.try_get_unchecked::<f64, _>(index).map(DatabaseValue::Float64),
        "BLOB" => row.try_get_unchecked::<Vec<u8>, _>(index).map(DatabaseValue::Bytes),
        _ => row.try_get_unchecked::<String, _>(index).map(DatabaseValue::String),
    };

    decoded.map_err(|e| OrmError::Query(format!("Failed to decode {} value: {}", storage_class, e)))
}

fn row_to_map(row: &SqliteRow) -> OrmResult<RowMap> {
    let mut map = RowMap::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name(), sqlite_value_to_database_value(row, index)?);
    }
    Ok(map)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl DatabaseConnection for SqliteConnection {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn product_name(&self) -> &str {
        "SQLite"
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let result = build_query(sql, params, false)
            .execute(&mut self.conn)
            .await
            .map_err(|e| OrmError::database(e, sql, params))?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<RowMap>> {
        let rows = build_query(sql, params, false)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| OrmError::database(e, sql, params))?;
        rows.iter().map(row_to_map).collect()
    }

    async fn fetch_each(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
        listener: &mut dyn RowListener,
    ) -> OrmResult<u64> {
        let mut stream = build_query(sql, params, false).fetch(&mut self.conn);
        let mut delivered = 0;
        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| OrmError::database(e, sql, params))?
        {
            delivered += 1;
            if !listener.next(row_to_map(&row)?) {
                break;
            }
        }
        Ok(delivered)
    }

    async fn insert_with_generated_key(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
        _id_name: &str,
    ) -> OrmResult<Option<GeneratedKey>> {
        let result = build_query(sql, params, true)
            .execute(&mut self.conn)
            .await
            .map_err(|e| OrmError::database(e, sql, params))?;
        if result.rows_affected() != 1 {
            return Ok(None);
        }
        Ok(Some(GeneratedKey::Value(DatabaseValue::Int64(result.last_insert_rowid()))))
    }

    async fn execute_batch(&mut self, sql: &str) -> OrmResult<u64> {
        let result = (&mut self.conn)
            .execute(sql)
            .await
            .map_err(|e| OrmError::database(e, sql, &[]))?;
        Ok(result.rows_affected())
    }

    async fn table_columns(&mut self, table: &str) -> OrmResult<Vec<ColumnMetadata>> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table));
        let rows = sqlx::query(&sql)
            .persistent(false)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| OrmError::database(e, &sql, &[]))?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("name")?;
                let declared: String = row.try_get("type")?;
                let (type_name, size) = split_declared_type(&declared);
                Ok(ColumnMetadata::new(name, type_name, size))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| OrmError::database(e, &sql, &[]))
    }

    async fn table_names(&mut self) -> OrmResult<Vec<String>> {
        let sql = "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";
        let rows = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| OrmError::database(e, sql, &[]))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OrmError::database(e, sql, &[]))
    }

    async fn clear_statement_cache(&mut self) -> OrmResult<()> {
        self.conn.clear_cached_statements().await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> OrmResult<()> {
        let this = *self;
        this.conn.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory() -> SqliteConnection {
        SqliteConnection::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_values() {
        let mut conn = memory().await;
        conn.execute_batch("CREATE TABLE things (id INTEGER PRIMARY KEY, label VARCHAR(20), weight REAL, data BLOB)")
            .await
            .unwrap();

        let key = conn
            .insert_with_generated_key(
                "INSERT INTO things (label, weight, data) VALUES (?, ?, ?)",
                &[DatabaseValue::from("box"), DatabaseValue::Float64(1.5), DatabaseValue::Bytes(vec![1, 2])],
                "id",
            )
            .await
            .unwrap();
        assert_eq!(key, Some(GeneratedKey::Value(DatabaseValue::Int64(1))));

        let rows = conn.fetch_all("SELECT * FROM things", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("LABEL"), Some(&DatabaseValue::from("box")));
        assert_eq!(rows[0].get("weight"), Some(&DatabaseValue::Float64(1.5)));
        assert_eq!(rows[0].get("data"), Some(&DatabaseValue::Bytes(vec![1, 2])));
    }

    #[tokio::test]
    async fn test_introspection() {
        let mut conn = memory().await;
        conn.execute_batch("CREATE TABLE people (id INTEGER PRIMARY KEY, name VARCHAR(56) NOT NULL)")
            .await
            .unwrap();

        let columns = conn.table_columns("people").await.unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1], ColumnMetadata::new("name", "VARCHAR", 56));

        assert!(conn.table_columns("ghosts").await.unwrap().is_empty());
        assert_eq!(conn.table_names().await.unwrap(), vec!["people".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_each_stops_when_listener_declines() {
        let mut conn = memory().await;
        conn.execute_batch(
            "CREATE TABLE n (v INTEGER); INSERT INTO n VALUES (1); INSERT INTO n VALUES (2); INSERT INTO n VALUES (3);",
        )
        .await
        .unwrap();

        let mut seen = Vec::new();
        let mut listener = |row: RowMap| {
            seen.push(row.get("v").cloned());
            false
        };
        let delivered = conn.fetch_each("SELECT v FROM n ORDER BY v", &[], &mut listener).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(seen, vec![Some(DatabaseValue::Int64(1))]);
    }

    #[tokio::test]
    async fn test_driver_error_carries_sql() {
        let mut conn = memory().await;
        let err = conn
            .fetch_all("SELECT * FROM ghosts WHERE id = ?", &[DatabaseValue::Int64(1)])
            .await
            .unwrap_err();
        assert_eq!(err.sql(), Some("SELECT * FROM ghosts WHERE id = ?"));
    }
}
