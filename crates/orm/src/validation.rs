//! Model validation
//!
//! Validators are registered on an entity descriptor and run by
//! `Model::validate` before every save. They never touch the database;
//! they read attributes and record messages into an [`Errors`] collection.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};
use crate::model::Model;
use crate::value::DatabaseValue;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern is valid")
});

/// Individual validation error for a specific attribute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    pub attribute: String,
    pub message: String,
    /// Error code for programmatic handling
    pub code: String,
}

impl ValidationError {
    pub fn new(attribute: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}

/// Collection of validation errors keyed by attribute name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Errors {
    errors: BTreeMap<String, Vec<ValidationError>>,
}

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, error: ValidationError) {
        self.errors.entry(error.attribute.to_lowercase()).or_default().push(error);
    }

    /// Add a simple validation error with attribute and message
    pub fn add_error(&mut self, attribute: impl Into<String>, message: impl Into<String>) {
        self.add(ValidationError::new(attribute, message, "invalid"));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of attributes with errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn total_errors(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    /// First message recorded for an attribute
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.errors
            .get(&attribute.to_lowercase())
            .and_then(|errors| errors.first())
            .map(|e| e.message.as_str())
    }

    pub fn for_attribute(&self, attribute: &str) -> &[ValidationError] {
        self.errors
            .get(&attribute.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.values().flatten()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self
            .errors
            .iter()
            .map(|(attribute, errors)| (attribute.clone(), errors.iter().map(|e| e.message.clone()).collect::<Vec<_>>()))
            .collect::<BTreeMap<_, _>>())
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "no validation errors");
        }
        let messages: Vec<String> = self.iter().map(|e| format!("{}: {}", e.attribute, e.message)).collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// A rule checked against a whole model before it is saved.
pub trait Validator: fmt::Debug + Send + Sync {
    fn validate(&self, model: &Model, errors: &mut Errors);
}

/// Attribute must be present and not blank
#[derive(Debug, Clone)]
pub struct PresenceValidator {
    attributes: Vec<String>,
    message: String,
}

impl PresenceValidator {
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl Validator for PresenceValidator {
    fn validate(&self, model: &Model, errors: &mut Errors) {
        for attribute in &self.attributes {
            let blank = match model.attribute(attribute) {
                None | Some(DatabaseValue::Null) => true,
                Some(DatabaseValue::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            };
            if blank {
                errors.add(ValidationError::new(attribute.clone(), self.message.clone(), "presence"));
            }
        }
    }
}

/// Attribute must be numeric, optionally an integer within bounds
#[derive(Debug, Clone)]
pub struct NumericValidator {
    attribute: String,
    min: Option<f64>,
    max: Option<f64>,
    only_integer: bool,
    allow_null: bool,
    message: Option<String>,
}

impl NumericValidator {
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn only_integer(mut self) -> Self {
        self.only_integer = true;
        self
    }

    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn fail(&self, errors: &mut Errors, default: String, code: &str) {
        let message = self.message.clone().unwrap_or(default);
        errors.add(ValidationError::new(self.attribute.clone(), message, code));
    }
}

impl Validator for NumericValidator {
    fn validate(&self, model: &Model, errors: &mut Errors) {
        let value = match model.attribute(&self.attribute) {
            None | Some(DatabaseValue::Null) => {
                if !self.allow_null {
                    self.fail(errors, "value is missing".to_string(), "numericality");
                }
                return;
            }
            Some(value) => value,
        };

        let number = match value.as_f64() {
            Some(n) => n,
            None => return self.fail(errors, "value is not a number".to_string(), "numericality"),
        };
        if self.only_integer && number.fract() != 0.0 {
            return self.fail(errors, "value is not an integer".to_string(), "numericality");
        }
        if let Some(min) = self.min {
            if number < min {
                return self.fail(errors, format!("value is less than {}", min), "range");
            }
        }
        if let Some(max) = self.max {
            if number > max {
                self.fail(errors, format!("value is greater than {}", max), "range");
            }
        }
    }
}

/// Attribute must match a regular expression
#[derive(Debug, Clone)]
pub struct RegexValidator {
    attribute: String,
    pattern: Regex,
    message: String,
    code: &'static str,
}

impl RegexValidator {
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl Validator for RegexValidator {
    fn validate(&self, model: &Model, errors: &mut Errors) {
        let matches = match model.attribute(&self.attribute) {
            Some(DatabaseValue::String(s)) => self.pattern.is_match(s),
            Some(DatabaseValue::Null) | None => false,
            Some(other) => self.pattern.is_match(&other.to_string()),
        };
        if !matches {
            errors.add(ValidationError::new(self.attribute.clone(), self.message.clone(), self.code));
        }
    }
}

/// Arbitrary rule written as a closure
#[derive(Clone)]
pub struct CustomValidator {
    name: String,
    check: Arc<dyn Fn(&Model, &mut Errors) + Send + Sync>,
}

impl fmt::Debug for CustomValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValidator").field("name", &self.name).finish()
    }
}

impl Validator for CustomValidator {
    fn validate(&self, model: &Model, errors: &mut Errors) {
        (self.check)(model, errors)
    }
}

pub fn presence_of(attributes: &[&str]) -> PresenceValidator {
    PresenceValidator {
        attributes: attributes.iter().map(|a| a.to_string()).collect(),
        message: "value is missing".to_string(),
    }
}

pub fn numericality_of(attribute: &str) -> NumericValidator {
    NumericValidator {
        attribute: attribute.to_string(),
        min: None,
        max: None,
        only_integer: false,
        allow_null: false,
        message: None,
    }
}

pub fn range_of(attribute: &str, min: f64, max: f64) -> NumericValidator {
    numericality_of(attribute).min(min).max(max)
}

pub fn regex_of(attribute: &str, pattern: &str) -> OrmResult<RegexValidator> {
    let pattern = Regex::new(pattern)
        .map_err(|e| OrmError::IllegalArgument(format!("invalid pattern for '{}': {}", attribute, e)))?;
    Ok(RegexValidator {
        attribute: attribute.to_string(),
        pattern,
        message: "value does not match the required format".to_string(),
        code: "format",
    })
}

pub fn email_of(attribute: &str) -> RegexValidator {
    RegexValidator {
        attribute: attribute.to_string(),
        pattern: EMAIL_PATTERN.clone(),
        message: "value is not a valid email address".to_string(),
        code: "email",
    }
}

pub fn custom<F>(name: &str, check: F) -> CustomValidator
where
    F: Fn(&Model, &mut Errors) + Send + Sync + 'static,
{
    CustomValidator {
        name: name.to_string(),
        check: Arc::new(check),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_collection() {
        let mut errors = Errors::new();
        assert!(errors.is_empty());

        errors.add_error("Name", "value is missing");
        errors.add(ValidationError::new("name", "too short", "length"));
        errors.add_error("age", "value is not a number");

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.total_errors(), 3);
        assert_eq!(errors.get("NAME"), Some("value is missing"));
        assert_eq!(errors.for_attribute("name").len(), 2);
        assert_eq!(errors.to_json()["age"][0], "value is not a number");
        assert!(errors.to_string().contains("age: value is not a number"));

        errors.clear();
        assert!(errors.is_empty());
    }

    #[test]
    fn test_email_pattern() {
        assert!(EMAIL_PATTERN.is_match("ann@example.com"));
        assert!(!EMAIL_PATTERN.is_match("ann@example"));
        assert!(regex_of("zip", "[").is_err());
    }
}
