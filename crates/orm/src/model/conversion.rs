//! Attribute converters
//!
//! A converter sits between an attribute and its column: `to_db` runs when
//! a value is set, `from_db` when it is read back. The pair must round-trip
//! the values the converter accepts.

use std::fmt;

use chrono::NaiveDate;

use crate::error::{OrmError, OrmResult};
use crate::value::DatabaseValue;

pub trait Converter: fmt::Debug + Send + Sync {
    fn to_db(&self, value: DatabaseValue) -> OrmResult<DatabaseValue>;

    fn from_db(&self, value: DatabaseValue) -> OrmResult<DatabaseValue> {
        Ok(value)
    }
}

/// Blank strings are stored as NULL
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankToNull;

impl Converter for BlankToNull {
    fn to_db(&self, value: DatabaseValue) -> OrmResult<DatabaseValue> {
        match value {
            DatabaseValue::String(ref s) if s.trim().is_empty() => Ok(DatabaseValue::Null),
            other => Ok(other),
        }
    }
}

/// Numeric text is stored as an integer and read back as text
#[derive(Debug, Clone, Copy, Default)]
pub struct StringToInteger;

impl Converter for StringToInteger {
    fn to_db(&self, value: DatabaseValue) -> OrmResult<DatabaseValue> {
        match value {
            DatabaseValue::String(s) => s
                .trim()
                .parse::<i64>()
                .map(DatabaseValue::Int64)
                .map_err(|_| OrmError::IllegalArgument(format!("'{}' is not an integer", s))),
            other => Ok(other),
        }
    }

    fn from_db(&self, value: DatabaseValue) -> OrmResult<DatabaseValue> {
        match value {
            DatabaseValue::Int32(i) => Ok(DatabaseValue::String(i.to_string())),
            DatabaseValue::Int64(i) => Ok(DatabaseValue::String(i.to_string())),
            other => Ok(other),
        }
    }
}

/// Date text in a fixed format is stored as a date
#[derive(Debug, Clone)]
pub struct StringToDate {
    format: String,
}

impl StringToDate {
    pub fn new(format: impl Into<String>) -> Self {
        Self { format: format.into() }
    }
}

impl Default for StringToDate {
    fn default() -> Self {
        Self::new("%Y-%m-%d")
    }
}

impl Converter for StringToDate {
    fn to_db(&self, value: DatabaseValue) -> OrmResult<DatabaseValue> {
        match value {
            DatabaseValue::String(s) => NaiveDate::parse_from_str(s.trim(), &self.format)
                .map(DatabaseValue::Date)
                .map_err(|e| OrmError::IllegalArgument(format!("'{}' does not match {}: {}", s, self.format, e))),
            other => Ok(other),
        }
    }

    fn from_db(&self, value: DatabaseValue) -> OrmResult<DatabaseValue> {
        match value {
            DatabaseValue::Date(d) => Ok(DatabaseValue::String(d.format(&self.format).to_string())),
            // SQLite hands dates back as ISO text
            DatabaseValue::String(s) => match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                Ok(d) => Ok(DatabaseValue::String(d.format(&self.format).to_string())),
                Err(_) => Ok(DatabaseValue::String(s)),
            },
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_to_null() {
        assert_eq!(BlankToNull.to_db(DatabaseValue::from("  ")).unwrap(), DatabaseValue::Null);
        assert_eq!(BlankToNull.to_db(DatabaseValue::from("x")).unwrap(), DatabaseValue::from("x"));
    }

    #[test]
    fn test_string_to_integer_round_trip() {
        let stored = StringToInteger.to_db(DatabaseValue::from("42")).unwrap();
        assert_eq!(stored, DatabaseValue::Int64(42));
        assert_eq!(StringToInteger.from_db(stored).unwrap(), DatabaseValue::from("42"));
        assert!(StringToInteger.to_db(DatabaseValue::from("4x2")).is_err());
    }

    #[test]
    fn test_string_to_date_round_trip() {
        let converter = StringToDate::new("%d/%m/%Y");
        let stored = converter.to_db(DatabaseValue::from("01/02/2024")).unwrap();
        assert_eq!(stored, DatabaseValue::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
        assert_eq!(converter.from_db(stored).unwrap(), DatabaseValue::from("01/02/2024"));
        assert_eq!(
            converter.from_db(DatabaseValue::from("2024-02-01")).unwrap(),
            DatabaseValue::from("01/02/2024")
        );
    }
}
