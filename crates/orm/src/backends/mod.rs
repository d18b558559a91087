//! Database Backend Abstractions
//!
//! Driver connections for the supported engines, behind the
//! [`DatabaseConnection`] trait. [`connect`] picks the backend from the URL
//! scheme.

pub mod core;
pub mod postgres;
pub mod sqlite;

pub use self::core::*;
pub use postgres::PostgresConnection;
pub use sqlite::SqliteConnection;

use crate::error::{OrmError, OrmResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect database backend type from URL
    pub fn from_url(database_url: &str) -> OrmResult<Self> {
        let parsed = url::Url::parse(database_url)
            .map_err(|e| OrmError::Initialization(format!("Invalid database URL '{}': {}", database_url, e)))?;
        parsed
            .scheme()
            .parse()
            .map_err(OrmError::Initialization)
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatabaseBackendType::MySQL),
            "sqlite" => Ok(DatabaseBackendType::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}

/// Open a single connection for the given URL.
pub async fn connect(database_url: &str) -> OrmResult<Box<dyn DatabaseConnection>> {
    match DatabaseBackendType::from_url(database_url)? {
        DatabaseBackendType::PostgreSQL => Ok(Box::new(PostgresConnection::connect(database_url).await?)),
        DatabaseBackendType::SQLite => Ok(Box::new(SqliteConnection::connect(database_url).await?)),
        DatabaseBackendType::MySQL => Err(OrmError::Initialization(
            "no MySQL driver is compiled into this build".to_string(),
        )),
    }
}
