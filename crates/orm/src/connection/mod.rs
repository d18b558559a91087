//! Connection Management
//!
//! A [`Session`] is one unit of work. It holds at most one open connection
//! per logical database name; attaching a second connection under a bound
//! name is an error rather than a silent replacement. Connections move
//! between sessions only through an explicit `detach` and `attach`.

pub mod statistics;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backends::{self, DatabaseConnection};
use crate::cache::StatementCache;
use crate::dialect::{dialect_for, Dialect};
use crate::error::{OrmError, OrmResult};
use crate::metadata::MetaModel;
use crate::registry::{DatabaseMetadata, Registry};
use crate::repository::Repository;

pub use statistics::SessionStats;

/// An attached connection and the state that belongs to it
pub(crate) struct ConnectionHandle {
    pub(crate) connection: Box<dyn DatabaseConnection>,
    pub(crate) dialect: Arc<dyn Dialect>,
    pub(crate) statements: StatementCache,
    pub(crate) in_transaction: bool,
}

impl ConnectionHandle {
    fn new(connection: Box<dyn DatabaseConnection>) -> Self {
        let dialect = dialect_for(connection.product_name());
        Self {
            connection,
            dialect,
            statements: StatementCache::new(),
            in_transaction: false,
        }
    }

    /// Drop prepared statements; failures are logged, never raised.
    async fn release_statements(&mut self, name: &str) {
        if self.statements.is_empty() {
            return;
        }
        self.statements.clear();
        if let Err(e) = self.connection.clear_statement_cache().await {
            warn!(connection = name, error = %e, "failed to clear statement cache");
        }
    }
}

pub struct Session {
    registry: Arc<Registry>,
    connections: HashMap<String, ConnectionHandle>,
    shard_tables: HashMap<String, String>,
    stats: SessionStats,
}

impl Session {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            connections: HashMap::new(),
            shard_tables: HashMap::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Bind a connection under a logical database name.
    pub fn attach(&mut self, name: &str, connection: Box<dyn DatabaseConnection>) -> OrmResult<()> {
        if self.connections.contains_key(name) {
            return Err(OrmError::ConnectionAlreadyAttached(name.to_string()));
        }
        debug!(connection = name, product = connection.product_name(), "attached connection");
        self.connections.insert(name.to_string(), ConnectionHandle::new(connection));
        Ok(())
    }

    /// Connect to `url` and attach the connection under `name`.
    pub async fn open(&mut self, name: &str, url: &str) -> OrmResult<()> {
        if self.connections.contains_key(name) {
            return Err(OrmError::ConnectionAlreadyAttached(name.to_string()));
        }
        let connection = backends::connect(url).await?;
        self.attach(name, connection)
    }

    /// Open the URL configured for `name`.
    pub async fn open_configured(&mut self, name: &str) -> OrmResult<()> {
        let url = self.registry.config().database_url(name)?.to_string();
        self.open(name, &url).await
    }

    /// Unbind a connection without closing it.
    pub async fn detach(&mut self, name: &str) -> OrmResult<Box<dyn DatabaseConnection>> {
        let mut handle = self
            .connections
            .remove(name)
            .ok_or_else(|| OrmError::ConnectionNotAvailable(name.to_string()))?;
        if handle.in_transaction {
            warn!(connection = name, "detaching a connection with an open transaction");
        }
        handle.release_statements(name).await;
        debug!(connection = name, "detached connection");
        Ok(handle.connection)
    }

    pub async fn close(&mut self, name: &str) -> OrmResult<()> {
        let connection = self.detach(name).await?;
        connection.close().await
    }

    /// Close every attached connection, logging failures.
    pub async fn close_all(&mut self) {
        let names: Vec<String> = self.connections.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.close(&name).await {
                warn!(connection = %name, error = %e, "failed to close connection");
            }
        }
    }

    pub fn has_connection(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn connection_names(&self) -> Vec<&str> {
        self.connections.keys().map(String::as_str).collect()
    }

    /// Dialect of the connection bound under `name`
    pub fn dialect(&self, name: &str) -> OrmResult<Arc<dyn Dialect>> {
        self.connections
            .get(name)
            .map(|h| Arc::clone(&h.dialect))
            .ok_or_else(|| OrmError::ConnectionNotAvailable(name.to_string()))
    }

    pub(crate) fn handle(&mut self, name: &str) -> OrmResult<&mut ConnectionHandle> {
        self.connections
            .get_mut(name)
            .ok_or_else(|| OrmError::ConnectionNotAvailable(name.to_string()))
    }

    pub async fn open_transaction(&mut self, name: &str) -> OrmResult<()> {
        let handle = self.handle(name)?;
        if handle.in_transaction {
            return Err(OrmError::IllegalArgument(format!(
                "a transaction is already open on '{}'; nested transactions are not supported",
                name
            )));
        }
        handle.connection.begin().await?;
        handle.in_transaction = true;
        debug!(connection = name, "transaction opened");
        Ok(())
    }

    pub async fn commit_transaction(&mut self, name: &str) -> OrmResult<()> {
        let handle = self.active_transaction(name)?;
        handle.in_transaction = false;
        handle.connection.commit().await?;
        debug!(connection = name, "transaction committed");
        Ok(())
    }

    /// Roll back; cached results written inside the transaction are
    /// dropped for every table of the database.
    pub async fn rollback_transaction(&mut self, name: &str) -> OrmResult<()> {
        let handle = self.active_transaction(name)?;
        handle.in_transaction = false;
        handle.connection.rollback().await?;
        debug!(connection = name, "transaction rolled back");
        if let Some(database) = self.registry.initialized(name) {
            for meta in database.metamodels() {
                self.registry.query_cache().purge_table(name, meta.table_name());
            }
        }
        Ok(())
    }

    pub fn in_transaction(&self, name: &str) -> bool {
        self.connections.get(name).map(|h| h.in_transaction).unwrap_or(false)
    }

    fn active_transaction(&mut self, name: &str) -> OrmResult<&mut ConnectionHandle> {
        let handle = self.handle(name)?;
        if !handle.in_transaction {
            return Err(OrmError::TransactionNotActive(name.to_string()));
        }
        Ok(handle)
    }

    /// Route every statement for `type_name` in this session to `table`.
    pub fn set_shard_table(&mut self, type_name: &str, table: &str) {
        self.shard_tables.insert(type_name.to_string(), table.to_string());
    }

    pub fn clear_shard_table(&mut self, type_name: &str) {
        self.shard_tables.remove(type_name);
    }

    /// Table statements for this type go to in this session
    pub fn table_name(&self, meta: &MetaModel) -> String {
        self.shard_tables
            .get(meta.type_name())
            .cloned()
            .unwrap_or_else(|| meta.table_name().to_string())
    }

    pub fn statistics(&self) -> SessionStats {
        self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats = SessionStats::default();
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    /// Metadata of a database, initializing it on first use
    pub async fn database(&mut self, db_name: &str) -> OrmResult<Arc<DatabaseMetadata>> {
        let registry = Arc::clone(&self.registry);
        if let Some(database) = registry.initialized(db_name) {
            return Ok(database);
        }
        let connection = if registry.has_snapshot_for(db_name) {
            None
        } else {
            Some(self.handle(db_name)?.connection.as_mut())
        };
        registry.initialize(db_name, connection).await
    }

    pub async fn metamodel(&mut self, type_name: &str) -> OrmResult<Arc<MetaModel>> {
        let db_name = self.registry.db_name_of(type_name)?.to_string();
        let database = self.database(&db_name).await?;
        database
            .metamodel(type_name)
            .cloned()
            .ok_or_else(|| OrmError::UnknownEntity(type_name.to_string()))
    }

    /// Repository for a registered type
    pub async fn repository(&mut self, type_name: &str) -> OrmResult<Repository> {
        Ok(Repository::new(self.metamodel(type_name).await?))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .field("shard_tables", &self.shard_tables)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EntityDescriptor;

    fn registry() -> Arc<Registry> {
        Registry::builder()
            .entity(EntityDescriptor::new("Person"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_attach_twice_fails() {
        let mut session = registry().session();
        session.open("default", "sqlite::memory:").await.unwrap();
        let second = backends::connect("sqlite::memory:").await.unwrap();
        assert!(matches!(
            session.attach("default", second),
            Err(OrmError::ConnectionAlreadyAttached(name)) if name == "default"
        ));
        assert!(matches!(
            session.open("default", "sqlite::memory:").await,
            Err(OrmError::ConnectionAlreadyAttached(_))
        ));
        session.close_all().await;
        assert!(!session.has_connection("default"));
    }

    #[tokio::test]
    async fn test_missing_connection() {
        let mut session = registry().session();
        assert!(matches!(session.handle("default"), Err(OrmError::ConnectionNotAvailable(_))));
        assert!(matches!(session.metamodel("Person").await, Err(OrmError::ConnectionNotAvailable(_))));
        assert!(matches!(session.detach("default").await, Err(OrmError::ConnectionNotAvailable(_))));
    }

    #[tokio::test]
    async fn test_detach_hands_connection_over() {
        let registry = registry();
        let mut first = registry.session();
        let mut second = registry.session();

        first.open("default", "sqlite::memory:").await.unwrap();
        let connection = first.detach("default").await.unwrap();
        assert!(!first.has_connection("default"));
        second.attach("default", connection).unwrap();
        assert!(second.has_connection("default"));
        assert_eq!(second.dialect("default").unwrap().name(), "sqlite");
    }

    #[tokio::test]
    async fn test_transaction_lifecycle() {
        let mut session = registry().session();
        assert!(matches!(
            session.commit_transaction("default").await,
            Err(OrmError::ConnectionNotAvailable(_))
        ));

        session.open("default", "sqlite::memory:").await.unwrap();
        assert!(matches!(
            session.rollback_transaction("default").await,
            Err(OrmError::TransactionNotActive(_))
        ));
        session.open_transaction("default").await.unwrap();
        assert!(session.in_transaction("default"));
        assert!(session.open_transaction("default").await.is_err());
        session.commit_transaction("default").await.unwrap();
        assert!(!session.in_transaction("default"));
    }
}
