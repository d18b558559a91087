//! # rowbound-orm: Active Record over discovered schemas
//!
//! Entity types are registered as descriptors; their columns and the
//! associations between them are discovered from the database (or loaded
//! from a metadata snapshot) the first time a database is used. Work
//! happens inside a [`Session`], which owns at most one connection per
//! logical database name.
//!
//! ```no_run
//! use rowbound_orm::{params, EntityDescriptor, Registry};
//!
//! # async fn run() -> rowbound_orm::OrmResult<()> {
//! let registry = Registry::builder()
//!     .entity(EntityDescriptor::new("Person"))
//!     .entity(EntityDescriptor::new("Address"))
//!     .build()?;
//! let mut session = registry.session();
//! session.open("default", "sqlite::memory:").await?;
//!
//! let people = session.repository("Person").await?;
//! let mut ann = people.from_map([("name", "Ann")])?;
//! ann.save_it(&mut session).await?;
//!
//! let mut found = people.where_("name = ?", params!["Ann"]).include(&["Address"])?;
//! assert_eq!(found.len(&mut session).await?, 1);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod cache;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod inflector;
pub mod lazy_list;
pub mod metadata;
pub mod model;
pub mod paginator;
pub mod registry;
pub mod repository;
pub mod validation;
pub mod value;

mod db;
mod loading;

pub use backends::{connect, ColumnMetadata, DatabaseBackendType, DatabaseConnection, GeneratedKey, RowListener};
pub use cache::{CacheStats, CachedValue, QueryCache};
pub use config::{ConfigError, OrmConfig, DEFAULT_DB_NAME};
pub use connection::{Session, SessionStats};
pub use dialect::{Dialect, LockMode};
pub use error::{ModelError, ModelResult, OrmError, OrmResult};
pub use lazy_list::LazyList;
pub use metadata::{Association, AssociationKind, EntityDescriptor, MetaModel};
pub use model::callbacks::ModelCallbacks;
pub use model::conversion::Converter;
pub use model::{Model, Related};
pub use paginator::Paginator;
pub use registry::{DatabaseMetadata, Registry, RegistryBuilder};
pub use repository::Repository;
pub use validation::{Errors, ValidationError, Validator};
pub use value::{DatabaseValue, RowMap};
