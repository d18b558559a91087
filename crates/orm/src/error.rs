//! Error types for the ORM system
//!
//! Every failure surfaced by the engine is an [`OrmError`]. The variants
//! split into initialization failures (fatal for the affected database),
//! driver failures (wrapped with the SQL and parameters that caused them),
//! connection-lifecycle misuse, and the expected, recoverable conditions
//! callers are meant to match on: stale models, validation failures,
//! missing associations and frozen instances.

use crate::config::ConfigError;
use crate::validation::Errors;
use crate::value::DatabaseValue;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type ModelError = OrmError;

/// ORM result type alias
pub type OrmResult<T> = Result<T, OrmError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum OrmError {
    /// Registry or metadata could not be initialized for a database
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Driver failure, carrying the statement that caused it
    #[error("Database error: {message}{}", render_statement(.sql, .params))]
    Database {
        message: String,
        sql: Option<String>,
        params: Vec<String>,
    },

    #[error("Connection '{0}' is already attached to this session")]
    ConnectionAlreadyAttached(String),

    #[error("No connection named '{0}' is attached to this session")]
    ConnectionNotAvailable(String),

    #[error("No transaction is open on connection '{0}'")]
    TransactionNotActive(String),

    /// Optimistic lock conflict: the row changed (or vanished) since it was read
    #[error("Failed to update record in '{table}' with id = {id} and version = {version}: the record no longer exists or carries another version")]
    StaleModel {
        table: String,
        id: String,
        version: i64,
    },

    #[error("Validation failed: {0}")]
    Validation(Errors),

    #[error("{source_type} is not associated with {target_type}")]
    NotAssociated { source_type: String, target_type: String },

    #[error("Cannot access a frozen instance of '{table}' (id = {id}); call thaw() first")]
    Frozen { table: String, id: String },

    #[error("Attribute '{attribute}' does not exist in table '{table}'")]
    AttributeNotFound { attribute: String, table: String },

    #[error("Table '{0}' does not exist or has no columns")]
    TableNotFound(String),

    #[error("Entity type '{0}' is not registered")]
    UnknownEntity(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// A value could not be decoded from or converted to a database type
    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn render_statement(sql: &Option<String>, params: &[String]) -> String {
    match sql {
        Some(sql) if params.is_empty() => format!("; query: {}", sql),
        Some(sql) => format!("; query: {}, params: {}", sql, params.join(", ")),
        None => String::new(),
    }
}

impl OrmError {
    /// Wrap a driver error together with the statement being executed.
    pub fn database(err: impl std::fmt::Display, sql: &str, params: &[DatabaseValue]) -> Self {
        OrmError::Database {
            message: err.to_string(),
            sql: Some(sql.to_string()),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, OrmError::StaleModel { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, OrmError::Validation(_))
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, OrmError::Frozen { .. })
    }

    pub fn is_not_associated(&self) -> bool {
        matches!(self, OrmError::NotAssociated { .. })
    }

    /// SQL text attached to a database error, if any
    pub fn sql(&self) -> Option<&str> {
        match self {
            OrmError::Database { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        OrmError::Database {
            message: err.to_string(),
            sql: None,
            params: Vec::new(),
        }
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for OrmError {
    fn from(err: std::io::Error) -> Self {
        OrmError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_carries_statement() {
        let err = OrmError::database(
            "no such table: ghosts",
            "SELECT * FROM ghosts WHERE id = ?",
            &[DatabaseValue::Int64(7)],
        );

        assert_eq!(err.sql(), Some("SELECT * FROM ghosts WHERE id = ?"));
        let message = err.to_string();
        assert!(message.contains("no such table: ghosts"));
        assert!(message.contains("SELECT * FROM ghosts WHERE id = ?"));
        assert!(message.contains("params: 7"));
    }

    #[test]
    fn test_sqlx_error_has_no_statement() {
        let err: OrmError = sqlx::Error::RowNotFound.into();
        assert!(err.sql().is_none());
        assert!(err.to_string().starts_with("Database error:"));
    }

    #[test]
    fn test_predicates() {
        let stale = OrmError::StaleModel { table: "accounts".into(), id: "1".into(), version: 2 };
        assert!(stale.is_stale());
        assert!(!stale.is_frozen());

        let frozen = OrmError::Frozen { table: "people".into(), id: "3".into() };
        assert!(frozen.is_frozen());

        let na = OrmError::NotAssociated { source_type: "Person".into(), target_type: "Doctor".into() };
        assert!(na.is_not_associated());
        assert_eq!(na.to_string(), "Person is not associated with Doctor");
    }
}
