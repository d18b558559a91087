//! Entity registry
//!
//! The registry owns every registered [`EntityDescriptor`], the metadata
//! built for each logical database and the process-wide query cache. A
//! database is initialized on first use: columns are introspected (or
//! read from a static snapshot), associations discovered, and the cache
//! dependency graph computed. Initialization runs once per database under
//! a per-database lock; the result is immutable and shared.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backends::{ColumnMetadata, DatabaseConnection};
use crate::cache::QueryCache;
use crate::config::OrmConfig;
use crate::connection::Session;
use crate::error::{OrmError, OrmResult};
use crate::metadata::discovery::{self, AssociationMap, EntityShape, TableShape};
use crate::metadata::model_registry::{self, RegistryEntry};
use crate::metadata::snapshot::{self, SnapshotEntry};
use crate::metadata::{Association, EntityDescriptor, MetaModel};

/// Everything known about one initialized logical database
#[derive(Debug)]
pub struct DatabaseMetadata {
    db_name: String,
    db_type: String,
    models: BTreeMap<String, Arc<MetaModel>>,
    tables: HashMap<String, String>,
    dependencies: HashMap<String, BTreeSet<String>>,
}

impl DatabaseMetadata {
    fn new(db_name: &str, db_type: String, models: Vec<MetaModel>) -> Self {
        let models: BTreeMap<String, Arc<MetaModel>> = models
            .into_iter()
            .map(|m| (m.type_name().to_string(), Arc::new(m)))
            .collect();
        let tables = models
            .values()
            .map(|m| (m.table_name().to_lowercase(), m.type_name().to_string()))
            .collect();
        let dependencies = dependency_graph(&models);
        Self {
            db_name: db_name.to_string(),
            db_type,
            models,
            tables,
            dependencies,
        }
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn db_type(&self) -> &str {
        &self.db_type
    }

    pub fn metamodel(&self, type_name: &str) -> Option<&Arc<MetaModel>> {
        self.models.get(type_name)
    }

    pub fn metamodel_for_table(&self, table: &str) -> Option<&Arc<MetaModel>> {
        self.tables
            .get(&table.to_lowercase())
            .and_then(|type_name| self.models.get(type_name))
    }

    pub fn metamodels(&self) -> impl Iterator<Item = &Arc<MetaModel>> {
        self.models.values()
    }

    /// Tables whose cached results go stale when `table` is written
    pub fn cache_dependencies(&self, table: &str) -> BTreeSet<String> {
        self.dependencies
            .get(&table.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn association_count(&self) -> usize {
        self.models.values().map(|m| m.associations().len()).sum()
    }
}

/// Each table depends on the tables it is directly associated with and on
/// the join tables of its many-to-many associations. A join table depends
/// on both of its sides.
fn dependency_graph(models: &BTreeMap<String, Arc<MetaModel>>) -> HashMap<String, BTreeSet<String>> {
    let mut graph: HashMap<String, BTreeSet<String>> = HashMap::new();
    for meta in models.values() {
        let table = meta.table_name().to_lowercase();
        for association in meta.associations() {
            if let Some(target) = models.get(association.target()) {
                graph
                    .entry(table.clone())
                    .or_default()
                    .insert(target.table_name().to_lowercase());
            }
            if let Some(join) = association.join_table() {
                let join = join.to_lowercase();
                graph.entry(table.clone()).or_default().insert(join.clone());
                graph.entry(join).or_default().insert(table.clone());
            }
        }
    }
    graph
}

pub struct RegistryBuilder {
    config: Option<OrmConfig>,
    descriptors: Vec<EntityDescriptor>,
    static_metadata: Option<PathBuf>,
    model_registry: Option<PathBuf>,
}

impl RegistryBuilder {
    pub fn config(mut self, config: OrmConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Initialize from a snapshot instead of live introspection
    pub fn static_metadata(mut self, path: impl Into<PathBuf>) -> Self {
        self.static_metadata = Some(path.into());
        self
    }

    /// Assign entity types to databases from a model registry file
    pub fn model_registry(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_registry = Some(path.into());
        self
    }

    pub fn build(self) -> OrmResult<Arc<Registry>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let mut descriptors = BTreeMap::new();
        for descriptor in self.descriptors {
            let type_name = descriptor.type_name().to_string();
            if descriptors.insert(type_name.clone(), descriptor).is_some() {
                return Err(OrmError::Initialization(format!("entity type '{}' is registered twice", type_name)));
            }
        }

        if let Some(path) = self.model_registry.or_else(|| config.model_registry.clone()) {
            for entry in model_registry::read(&path)? {
                let descriptor = descriptors.get_mut(&entry.type_name).ok_or_else(|| {
                    OrmError::Initialization(format!(
                        "model registry {} lists '{}', which has no registered descriptor",
                        path.display(),
                        entry.type_name
                    ))
                })?;
                descriptor.db_name = entry.db_name;
            }
        }

        let snapshot = match self.static_metadata.or_else(|| config.static_metadata.clone()) {
            Some(path) => snapshot::read(&path)?,
            None => Vec::new(),
        };

        Ok(Arc::new(Registry {
            query_cache: QueryCache::new(config.cache_enabled),
            config,
            descriptors,
            snapshot,
            databases: DashMap::new(),
            init_locks: DashMap::new(),
        }))
    }
}

pub struct Registry {
    config: OrmConfig,
    descriptors: BTreeMap<String, EntityDescriptor>,
    snapshot: Vec<SnapshotEntry>,
    databases: DashMap<String, Arc<DatabaseMetadata>>,
    init_locks: DashMap<String, Arc<Mutex<()>>>,
    query_cache: QueryCache,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            config: None,
            descriptors: Vec::new(),
            static_metadata: None,
            model_registry: None,
        }
    }

    /// Open a new unit of work against this registry
    pub fn session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self))
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    pub fn query_cache(&self) -> &QueryCache {
        &self.query_cache
    }

    pub fn descriptor(&self, type_name: &str) -> OrmResult<&EntityDescriptor> {
        self.descriptors
            .get(type_name)
            .ok_or_else(|| OrmError::UnknownEntity(type_name.to_string()))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.descriptors.values()
    }

    /// Logical database a type belongs to
    pub fn db_name_of(&self, type_name: &str) -> OrmResult<&str> {
        self.descriptor(type_name).map(|d| d.db_name())
    }

    pub fn initialized(&self, db_name: &str) -> Option<Arc<DatabaseMetadata>> {
        self.databases.get(db_name).map(|m| Arc::clone(m.value()))
    }

    pub fn is_initialized(&self, db_name: &str) -> bool {
        self.databases.contains_key(db_name)
    }

    /// Metadata of a type whose database is already initialized
    pub fn metamodel(&self, type_name: &str) -> OrmResult<Arc<MetaModel>> {
        let db_name = self.db_name_of(type_name)?;
        let database = self
            .initialized(db_name)
            .ok_or_else(|| OrmError::Initialization(format!("database '{}' is not initialized", db_name)))?;
        database
            .metamodel(type_name)
            .cloned()
            .ok_or_else(|| OrmError::UnknownEntity(type_name.to_string()))
    }

    pub fn metamodel_for_table(&self, db_name: &str, table: &str) -> Option<Arc<MetaModel>> {
        self.initialized(db_name)
            .and_then(|database| database.metamodel_for_table(table).cloned())
    }

    pub fn associations_of(&self, type_name: &str) -> OrmResult<Vec<Association>> {
        Ok(self.metamodel(type_name)?.associations().to_vec())
    }

    pub fn cache_dependencies(&self, db_name: &str, table: &str) -> BTreeSet<String> {
        self.initialized(db_name)
            .map(|database| database.cache_dependencies(table))
            .unwrap_or_default()
    }

    /// Drop cached results for a written table and every table that
    /// depends on `base_table`. The two differ only for sharded writes.
    pub fn purge(&self, db_name: &str, written_table: &str, base_table: &str) {
        if !self.query_cache.is_enabled() {
            return;
        }
        self.query_cache.purge_table(db_name, written_table);
        self.query_cache.purge_table(db_name, base_table);
        for dependent in self.cache_dependencies(db_name, base_table) {
            self.query_cache.purge_table(db_name, &dependent);
        }
    }

    pub(crate) fn has_snapshot_for(&self, db_name: &str) -> bool {
        self.snapshot.iter().any(|e| e.db_name == db_name)
    }

    /// Build the metadata of a database unless another task already did.
    ///
    /// `connection` may be `None` only when a snapshot covers the database.
    pub(crate) async fn initialize(
        &self,
        db_name: &str,
        connection: Option<&mut (dyn DatabaseConnection + '_)>,
    ) -> OrmResult<Arc<DatabaseMetadata>> {
        if let Some(database) = self.initialized(db_name) {
            return Ok(database);
        }
        let lock = Arc::clone(self.init_locks.entry(db_name.to_string()).or_default().value());
        let _guard = lock.lock().await;
        if let Some(database) = self.initialized(db_name) {
            return Ok(database);
        }

        let (database, source) = if self.has_snapshot_for(db_name) {
            (self.load_snapshot(db_name)?, "snapshot")
        } else {
            let connection = connection.ok_or_else(|| OrmError::ConnectionNotAvailable(db_name.to_string()))?;
            (self.introspect(db_name, connection).await?, "introspection")
        };

        info!(
            db = db_name,
            entities = database.models.len(),
            associations = database.association_count(),
            source,
            "initialized database metadata"
        );
        let database = Arc::new(database);
        self.databases.insert(db_name.to_string(), Arc::clone(&database));
        Ok(database)
    }

    fn descriptors_for(&self, db_name: &str) -> Vec<&EntityDescriptor> {
        self.descriptors
            .values()
            .filter(|d| d.db_name() == db_name)
            .collect()
    }

    async fn introspect(&self, db_name: &str, connection: &mut (dyn DatabaseConnection + '_)) -> OrmResult<DatabaseMetadata> {
        let db_type = connection.product_name().to_string();
        let descriptors = self.descriptors_for(db_name);

        let mut columns: BTreeMap<String, Vec<ColumnMetadata>> = BTreeMap::new();
        for descriptor in &descriptors {
            let found = fetch_columns(connection, descriptor.table_name()).await?;
            if found.is_empty() {
                debug!(table = descriptor.table_name(), "no columns found, table is missing");
            }
            columns.insert(descriptor.type_name().to_string(), found);
        }

        let shapes: Vec<EntityShape> = descriptors
            .iter()
            .map(|d| {
                EntityShape::new(
                    d.type_name(),
                    d.table_name(),
                    columns[d.type_name()].iter().map(|c| c.column_name.clone()),
                )
            })
            .collect();

        let mut associations = if self.config.infer_associations {
            let mapped: HashSet<String> = descriptors.iter().map(|d| d.table_name().to_lowercase()).collect();
            let mut unmapped = Vec::new();
            let names = connection.table_names().await.map_err(|e| introspection_error("table list", e))?;
            for table in names {
                if mapped.contains(&table.to_lowercase()) {
                    continue;
                }
                let found = connection
                    .table_columns(&table)
                    .await
                    .map_err(|e| introspection_error(&table, e))?;
                unmapped.push(TableShape::new(table, found.into_iter().map(|c| c.column_name)));
            }
            discovery::infer(&shapes, &unmapped)
        } else {
            AssociationMap::new()
        };

        let overrides: Vec<_> = descriptors
            .iter()
            .flat_map(|d| d.overrides().iter().map(move |o| (d.type_name().to_string(), o.clone())))
            .collect();
        discovery::apply_overrides(&mut associations, &shapes, &overrides)?;

        let models = descriptors
            .into_iter()
            .map(|d| {
                let type_name = d.type_name().to_string();
                MetaModel::new(
                    d.clone(),
                    db_type.clone(),
                    columns.remove(&type_name).unwrap_or_default(),
                    associations.remove(&type_name).unwrap_or_default(),
                )
            })
            .collect();
        Ok(DatabaseMetadata::new(db_name, db_type, models))
    }

    fn load_snapshot(&self, db_name: &str) -> OrmResult<DatabaseMetadata> {
        let entries: Vec<&SnapshotEntry> = self.snapshot.iter().filter(|e| e.db_name == db_name).collect();
        let mut models = Vec::with_capacity(entries.len());
        let mut db_type = String::new();
        for entry in entries {
            let descriptor = match self.descriptors.get(&entry.type_name) {
                Some(descriptor) => descriptor.clone(),
                None => EntityDescriptor::new(entry.type_name.clone())
                    .table(entry.table_name.clone())
                    .database(db_name),
            };
            db_type = entry.db_type.clone();
            models.push(MetaModel::new(
                descriptor,
                entry.db_type.clone(),
                entry.columns.values().cloned().collect(),
                entry.associations.clone(),
            ));
        }
        for descriptor in self.descriptors_for(db_name) {
            if !models.iter().any(|m| m.type_name() == descriptor.type_name()) {
                return Err(OrmError::Initialization(format!(
                    "static metadata has no entry for '{}' in database '{}'",
                    descriptor.type_name(),
                    db_name
                )));
            }
        }
        Ok(DatabaseMetadata::new(db_name, db_type, models))
    }

    /// Snapshot entries for every initialized database
    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        let mut entries: Vec<SnapshotEntry> = self
            .databases
            .iter()
            .flat_map(|database| {
                database
                    .value()
                    .metamodels()
                    .map(|m| SnapshotEntry::from_meta(m))
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| (&a.db_name, &a.type_name).cmp(&(&b.db_name, &b.type_name)));
        entries
    }

    pub fn write_snapshot(&self, path: &Path) -> OrmResult<()> {
        snapshot::write(path, &self.snapshot())
    }

    pub fn model_registry_entries(&self) -> Vec<RegistryEntry> {
        self.descriptors
            .values()
            .map(|d| RegistryEntry::new(d.type_name(), d.db_name()))
            .collect()
    }

    pub fn write_model_registry(&self, path: &Path) -> OrmResult<()> {
        model_registry::write(path, &self.model_registry_entries())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("descriptors", &self.descriptors.keys().collect::<Vec<_>>())
            .field("initialized", &self.databases.iter().map(|d| d.key().clone()).collect::<Vec<_>>())
            .finish()
    }
}

/// Engines disagree on identifier case, so retry the table name as
/// given, upper-cased, lower-cased and without quotes.
async fn fetch_columns(connection: &mut (dyn DatabaseConnection + '_), table: &str) -> OrmResult<Vec<ColumnMetadata>> {
    let mut candidates: Vec<String> = Vec::with_capacity(4);
    for candidate in [
        table.to_string(),
        table.to_uppercase(),
        table.to_lowercase(),
        table.replace(['"', '`', '[', ']'], ""),
    ] {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    for candidate in candidates {
        let columns = connection
            .table_columns(&candidate)
            .await
            .map_err(|e| introspection_error(table, e))?;
        if !columns.is_empty() {
            return Ok(columns);
        }
    }
    Ok(Vec::new())
}

fn introspection_error(what: &str, err: OrmError) -> OrmError {
    OrmError::Initialization(format!("failed to introspect {}: {}", what, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ColumnMetadata;

    fn meta(type_name: &str, associations: Vec<Association>) -> MetaModel {
        MetaModel::new(
            EntityDescriptor::new(type_name),
            "SQLite",
            vec![ColumnMetadata::new("id", "INTEGER", 0)],
            associations,
        )
    }

    #[test]
    fn test_dependency_graph_is_one_level() {
        let database = DatabaseMetadata::new(
            "default",
            "SQLite".to_string(),
            vec![
                meta(
                    "Doctor",
                    vec![Association::ManyToMany {
                        source: "Doctor".into(),
                        target: "Patient".into(),
                        join: "doctors_patients".into(),
                        source_fk: "doctor_id".into(),
                        target_fk: "patient_id".into(),
                    }],
                ),
                meta("Patient", vec![]),
                meta(
                    "Address",
                    vec![Association::BelongsTo {
                        source: "Address".into(),
                        target: "Person".into(),
                        fk_name: "person_id".into(),
                    }],
                ),
                meta("Person", vec![]),
            ],
        );

        let deps = database.cache_dependencies("DOCTORS");
        assert!(deps.contains("patients"));
        assert!(deps.contains("doctors_patients"));
        assert!(database.cache_dependencies("doctors_patients").contains("doctors"));
        assert_eq!(database.cache_dependencies("addresses").into_iter().collect::<Vec<_>>(), vec!["people"]);
        assert!(database.cache_dependencies("people").is_empty());
        assert_eq!(database.metamodel_for_table("People").map(|m| m.type_name()), Some("Person"));
    }

    #[test]
    fn test_builder_rejects_duplicate_types() {
        let result = Registry::builder()
            .entity(EntityDescriptor::new("Person"))
            .entity(EntityDescriptor::new("Person"))
            .build();
        assert!(matches!(result, Err(OrmError::Initialization(_))));
    }

    #[test]
    fn test_model_registry_assigns_databases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models");
        std::fs::write(&path, "Doctor:clinic\n").unwrap();

        let registry = Registry::builder()
            .entity(EntityDescriptor::new("Doctor"))
            .entity(EntityDescriptor::new("Person"))
            .model_registry(&path)
            .build()
            .unwrap();
        assert_eq!(registry.db_name_of("Doctor").unwrap(), "clinic");
        assert_eq!(registry.db_name_of("Person").unwrap(), "default");
        assert!(matches!(registry.db_name_of("Ghost"), Err(OrmError::UnknownEntity(_))));

        std::fs::write(&path, "Ghost:default\n").unwrap();
        let result = Registry::builder().model_registry(&path).build();
        assert!(matches!(result, Err(OrmError::Initialization(_))));
    }
}
