//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL-specific implementation of the database
//! connection trait using sqlx as the underlying database driver. SQL reaching
//! this layer already uses `$n` placeholders.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, Postgres, Row, TypeInfo, ValueRef};
use std::str::FromStr;

use super::core::*;
use super::DatabaseBackendType;
use crate::error::{OrmError, OrmResult};
use crate::value::{DatabaseValue, RowMap};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL connection wrapper
pub struct PostgresConnection {
    conn: sqlx::PgConnection,
}

impl PostgresConnection {
    pub async fn connect(database_url: &str) -> OrmResult<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| OrmError::Initialization(format!("Invalid PostgreSQL URL: {}", e)))?;
        let conn = options
            .connect()
            .await
            .map_err(|e| OrmError::Initialization(format!("Failed to connect to PostgreSQL: {}", e)))?;
        tracing::debug!("Opened PostgreSQL connection");
        Ok(Self { conn })
    }

    /// Wrap an already open sqlx connection
    pub fn from_sqlx(conn: sqlx::PgConnection) -> Self {
        Self { conn }
    }
}

fn build_query<'q>(sql: &'q str, params: &[DatabaseValue], persistent: bool) -> PgQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql).persistent(persistent), bind_database_value)
}

/// Bind a DatabaseValue to a PostgreSQL query
fn bind_database_value<'q>(query: PgQuery<'q>, value: &DatabaseValue) -> PgQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float32(f) => query.bind(*f),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Time(t) => query.bind(*t),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| OrmError::Query(format!("Failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let decoded = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(index).map(DatabaseValue::Bool),
        "INT2" => row.try_get::<i16, _>(index).map(|v| DatabaseValue::Int32(v as i32)),
        "INT4" => row.try_get::<i32, _>(index).map(DatabaseValue::Int32),
        "INT8" => row.try_get::<i64, _>(index).map(DatabaseValue::Int64),
        "FLOAT4" => row.try_get::<f32, _>(index).map(DatabaseValue::Float32),
        "FLOAT8" => row.try_get::<f64, _>(index).map(DatabaseValue::Float64),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => row.try_get::<String, _>(index).map(DatabaseValue::String),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(DatabaseValue::Bytes),
        "UUID" => row.try_get::<uuid::Uuid, _>(index).map(DatabaseValue::Uuid),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(DatabaseValue::DateTime),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|v| DatabaseValue::DateTime(v.and_utc())),
        "DATE" => row.try_get::<chrono::NaiveDate, _>(index).map(DatabaseValue::Date),
        "TIME" => row.try_get::<chrono::NaiveTime, _>(index).map(DatabaseValue::Time),
        "JSON" | "JSONB" => row.try_get::<serde_json::Value, _>(index).map(DatabaseValue::Json),
        other => {
            return Err(OrmError::Query(format!(
                "Unsupported PostgreSQL type '{}' in column {}",
                other, index
            )))
        }
    };

    decoded.map_err(|e| OrmError::Query(format!("Failed to decode {} value: {}", type_name, e)))
}

fn row_to_map(row: &PgRow) -> OrmResult<RowMap> {
    let mut map = RowMap::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name(), postgres_value_to_database_value(row, index)?);
    }
    Ok(map)
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    fn product_name(&self) -> &str {
        "PostgreSQL"
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
        id_name: &str,
    ) -> OrmResult<Option<GeneratedKey>> {
        let returning = format!("{} RETURNING {}", sql, id_name);
        let rows = build_query(&returning, params, true)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| OrmError::database(e, &returning, params))?;
        if rows.len() != 1 {
            return Ok(None);
        }
        let key = postgres_value_to_database_value(&rows[0], 0)?;
        Ok(Some(GeneratedKey::Value(key)))
    }

    async fn execute_batch(&mut self, sql: &str) -> OrmResult<u64> {
        let result = (&mut self.conn)
            .execute(sql)
            .await
            .map_err(|e| OrmError::database(e, sql, &[]))?;
        Ok(result.rows_affected())
    }

    async fn table_columns(&mut self, table: &str) -> OrmResult<Vec<ColumnMetadata>> {
        let (schema, table) = match table.split_once('.') {
            Some((schema, table)) => (Some(schema), table),
            None => (None, table),
        };
        let sql = "SELECT column_name::text, data_type::text, \
                   COALESCE(character_maximum_length, numeric_precision, 0)::int4 \
                   FROM information_schema.columns \
                   WHERE table_name = $1 AND table_schema = COALESCE($2, current_schema()) \
                   ORDER BY ordinal_position";
        let rows = sqlx::query(sql)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| OrmError::database(e, sql, &[DatabaseValue::from(table)]))?;

        rows.iter()
            .map(|row| {
                Ok(ColumnMetadata::new(
                    row.try_get::<String, _>(0)?,
                    row.try_get::<String, _>(1)?.to_uppercase(),
                    row.try_get::<i32, _>(2)?,
                ))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| OrmError::database(e, sql, &[]))
    }

    async fn table_names(&mut self) -> OrmResult<Vec<String>> {
        let sql = "SELECT table_name::text FROM information_schema.tables \
                   WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' ORDER BY table_name";
        let rows = sqlx::query(sql)
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
