//! ORM configuration
//!
//! Settings are read from `ROWBOUND_*` environment variables. Database URLs
//! are keyed by logical database name: `ROWBOUND_DATABASE_URL` configures
//! `default`, `ROWBOUND_DATABASE_URL_REPORTING` configures `reporting`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Logical name used when a descriptor does not name a database
pub const DEFAULT_DB_NAME: &str = "default";

const PREFIX: &str = "ROWBOUND_";
const URL_VAR: &str = "ROWBOUND_DATABASE_URL";

/// Configuration error type
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

#[derive(Debug, Clone)]
pub struct OrmConfig {
    /// Connection URLs by logical database name
    pub database_urls: HashMap<String, String>,
    /// Global switch; descriptors still have to opt in with `cached()`
    pub cache_enabled: bool,
    /// Infer associations from column naming conventions at init
    pub infer_associations: bool,
    /// Allow `Model::related(name)` to guess associations from a name
    pub name_inference: bool,
    /// Maintain `created_at` / `updated_at` automatically
    pub manage_timestamps: bool,
    pub cascade_depth: usize,
    pub slow_query_threshold: Duration,
    pub static_metadata: Option<PathBuf>,
    pub model_registry: Option<PathBuf>,
}

impl OrmConfig {
    pub fn new() -> Self {
        Self {
            database_urls: HashMap::new(),
            cache_enabled: true,
            infer_associations: true,
            name_inference: false,
            manage_timestamps: true,
            cascade_depth: 16,
            slow_query_threshold: Duration::from_millis(1000),
            static_metadata: None,
            model_registry: None,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env::vars())
    }

    /// Load configuration from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::new();

        for (key, value) in vars {
            let key: String = key.into();
            let value: String = value.into();
            if !key.starts_with(PREFIX) {
                continue;
            }

            if key == URL_VAR {
                config.database_urls.insert(DEFAULT_DB_NAME.to_string(), value);
                continue;
            }
            if let Some(name) = key.strip_prefix("ROWBOUND_DATABASE_URL_") {
                config.database_urls.insert(name.to_lowercase(), value);
                continue;
            }

            match &key[PREFIX.len()..] {
                "CACHE_ENABLED" => config.cache_enabled = parse_bool(&key, &value)?,
                "INFER_ASSOCIATIONS" => config.infer_associations = parse_bool(&key, &value)?,
                "NAME_INFERENCE" => config.name_inference = parse_bool(&key, &value)?,
                "MANAGE_TIMESTAMPS" => config.manage_timestamps = parse_bool(&key, &value)?,
                "CASCADE_DEPTH" => {
                    config.cascade_depth = value.parse().map_err(|_| ConfigError::InvalidValue {
                        field: key.clone(),
                        value: value.clone(),
                        expected: "a positive integer".to_string(),
                    })?;
                }
                "SLOW_QUERY_MS" => {
                    let ms: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                        field: key.clone(),
                        value: value.clone(),
                        expected: "milliseconds as an integer".to_string(),
                    })?;
                    config.slow_query_threshold = Duration::from_millis(ms);
                }
                "STATIC_METADATA" => config.static_metadata = Some(PathBuf::from(value)),
                "MODEL_REGISTRY" => config.model_registry = Some(PathBuf::from(value)),
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cascade_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cascade_depth".to_string(),
                value: "0".to_string(),
                expected: "a depth of at least 1".to_string(),
            });
        }

        for (name, url) in &self.database_urls {
            if url.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: format!("database_urls.{}", name),
                    hint: "database URL must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// URL configured for a logical database
    pub fn database_url(&self, db_name: &str) -> Result<&str, ConfigError> {
        self.database_urls
            .get(db_name)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingRequired {
                field: format!("database_urls.{}", db_name),
                hint: if db_name == DEFAULT_DB_NAME {
                    format!("set {}", URL_VAR)
                } else {
                    format!("set {}_{}", URL_VAR, db_name.to_uppercase())
                },
            })
    }

    pub fn with_database_url(mut self, db_name: impl Into<String>, url: impl Into<String>) -> Self {
        self.database_urls.insert(db_name.into(), url.into());
        self
    }
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "true or false".to_string(),
        }),
    }
}
