//! Entity descriptors and the per-type metadata built from them
//!
//! An [`EntityDescriptor`] is what application code registers: the type
//! name plus whatever deviates from convention (table, keys, database,
//! caching, versioning, converters, validators, callbacks and declared
//! associations). A [`MetaModel`] is the descriptor joined with the
//! columns and associations discovered for its table.

pub mod associations;
pub mod discovery;
pub mod model_registry;
pub mod snapshot;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::backends::ColumnMetadata;
use crate::config::DEFAULT_DB_NAME;
use crate::error::{OrmError, OrmResult};
use crate::inflector;
use crate::model::callbacks::ModelCallbacks;
use crate::model::conversion::Converter;
use crate::validation::Validator;

pub use associations::{Association, AssociationKind, AssociationOverride};

/// Column used as the optimistic concurrency token by `versioned()`
pub const DEFAULT_VERSION_COLUMN: &str = "record_version";

#[derive(Clone)]
pub struct EntityDescriptor {
    pub(crate) type_name: String,
    pub(crate) table: String,
    pub(crate) id_name: String,
    pub(crate) composite_keys: Vec<String>,
    pub(crate) db_name: String,
    pub(crate) cached: bool,
    pub(crate) version_column: Option<String>,
    pub(crate) partition_columns: Vec<String>,
    pub(crate) converters: Vec<(String, Arc<dyn Converter>)>,
    pub(crate) validators: Vec<Arc<dyn Validator>>,
    pub(crate) callbacks: Vec<Arc<dyn ModelCallbacks>>,
    pub(crate) overrides: Vec<AssociationOverride>,
}

impl EntityDescriptor {
    /// Descriptor with conventional names: `Person` maps to `people.id`
    /// in the default database.
    pub fn new(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            table: inflector::table_name_for(&type_name),
            type_name,
            id_name: "id".to_string(),
            composite_keys: Vec::new(),
            db_name: DEFAULT_DB_NAME.to_string(),
            cached: false,
            version_column: None,
            partition_columns: Vec::new(),
            converters: Vec::new(),
            validators: Vec::new(),
            callbacks: Vec::new(),
            overrides: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn id_name(mut self, id_name: impl Into<String>) -> Self {
        self.id_name = id_name.into();
        self
    }

    pub fn composite_keys(mut self, keys: &[&str]) -> Self {
        self.composite_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn database(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    pub fn versioned(self) -> Self {
        self.version_column(DEFAULT_VERSION_COLUMN)
    }

    pub fn version_column(mut self, column: impl Into<String>) -> Self {
        self.version_column = Some(column.into());
        self
    }

    /// Columns appended to the WHERE clause of every update and delete
    pub fn partition_columns(mut self, columns: &[&str]) -> Self {
        self.partition_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn converter(mut self, attribute: &str, converter: impl Converter + 'static) -> Self {
        self.converters.push((attribute.to_lowercase(), Arc::new(converter)));
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn callbacks(mut self, callbacks: impl ModelCallbacks + 'static) -> Self {
        self.callbacks.push(Arc::new(callbacks));
        self
    }

    pub fn belongs_to(mut self, parent: impl Into<String>, fk_name: Option<&str>) -> Self {
        self.overrides.push(AssociationOverride::BelongsTo {
            parent: parent.into(),
            fk_name: fk_name.map(str::to_string),
        });
        self
    }

    pub fn has_many(mut self, child: impl Into<String>, fk_name: Option<&str>) -> Self {
        self.overrides.push(AssociationOverride::HasMany {
            child: child.into(),
            fk_name: fk_name.map(str::to_string),
        });
        self
    }

    pub fn many_to_many(mut self, other: impl Into<String>, join: &str, source_fk: &str, target_fk: &str) -> Self {
        self.overrides.push(AssociationOverride::ManyToMany {
            other: other.into(),
            join: join.to_string(),
            source_fk: source_fk.to_string(),
            target_fk: target_fk.to_string(),
        });
        self
    }

    /// Rows of this type carry `parent_id`/`parent_type`; the type label
    /// stored in `parent_type` defaults to the parent's type name.
    pub fn belongs_to_polymorphic(mut self, parent: impl Into<String>, type_label: Option<&str>) -> Self {
        self.overrides.push(AssociationOverride::BelongsToPolymorphic {
            parent: parent.into(),
            type_label: type_label.map(str::to_string),
        });
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn overrides(&self) -> &[AssociationOverride] {
        &self.overrides
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .field("id_name", &self.id_name)
            .field("composite_keys", &self.composite_keys)
            .field("db_name", &self.db_name)
            .field("cached", &self.cached)
            .field("version_column", &self.version_column)
            .field("partition_columns", &self.partition_columns)
            .field("converters", &self.converters.len())
            .field("validators", &self.validators.len())
            .field("callbacks", &self.callbacks.len())
            .field("overrides", &self.overrides)
            .finish()
    }
}

/// Metadata of one entity type, immutable once its database is initialized
#[derive(Debug)]
pub struct MetaModel {
    descriptor: EntityDescriptor,
    db_type: String,
    columns: BTreeMap<String, ColumnMetadata>,
    associations: Vec<Association>,
}

impl MetaModel {
    pub(crate) fn new(
        descriptor: EntityDescriptor,
        db_type: impl Into<String>,
        columns: Vec<ColumnMetadata>,
        associations: Vec<Association>,
    ) -> Self {
        let columns = columns
            .into_iter()
            .map(|c| (c.column_name.to_lowercase(), c))
            .collect();
        Self {
            descriptor,
            db_type: db_type.into(),
            columns,
            associations,
        }
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub fn type_name(&self) -> &str {
        &self.descriptor.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.descriptor.table
    }

    pub fn id_name(&self) -> &str {
        &self.descriptor.id_name
    }

    pub fn db_name(&self) -> &str {
        &self.descriptor.db_name
    }

    /// Product name of the database the columns were read from
    pub fn db_type(&self) -> &str {
        &self.db_type
    }

    pub fn is_cached(&self) -> bool {
        self.descriptor.cached
    }

    pub fn composite_keys(&self) -> &[String] {
        &self.descriptor.composite_keys
    }

    pub fn has_composite_keys(&self) -> bool {
        !self.descriptor.composite_keys.is_empty()
    }

    /// Columns identifying a row: the composite keys or the id column
    pub fn key_columns(&self) -> Vec<String> {
        if self.has_composite_keys() {
            self.descriptor.composite_keys.clone()
        } else {
            vec![self.descriptor.id_name.clone()]
        }
    }

    pub fn version_column(&self) -> Option<&str> {
        self.descriptor.version_column.as_deref()
    }

    pub fn is_versioned(&self) -> bool {
        self.descriptor.version_column.is_some()
    }

    pub fn partition_columns(&self) -> &[String] {
        &self.descriptor.partition_columns
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.values()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.get(&name.to_lowercase())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.columns.contains_key(&name.to_lowercase())
    }

    /// A mapped type whose table was not found has no columns; every
    /// attribute operation on it fails here.
    pub fn check_table(&self) -> OrmResult<()> {
        if self.columns.is_empty() {
            return Err(OrmError::TableNotFound(self.descriptor.table.clone()));
        }
        Ok(())
    }

    /// Foreign key other tables use to point at this one
    pub fn fk_name(&self) -> String {
        inflector::foreign_key_for(&self.descriptor.table)
    }

    pub fn has_timestamps(&self) -> bool {
        self.has_attribute("created_at") || self.has_attribute("updated_at")
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Preferred association to a target type: belongs-to first, then
    /// polymorphic parent, one-to-many, polymorphic children, many-to-many.
    pub fn association_to(&self, target: &str) -> Option<&Association> {
        self.associations
            .iter()
            .filter(|a| a.target() == target)
            .min_by_key(|a| a.precedence())
    }

    pub fn association_of_kind(&self, target: &str, kind: AssociationKind) -> Option<&Association> {
        self.associations
            .iter()
            .find(|a| a.target() == target && a.kind() == kind)
    }

    pub fn is_associated_with(&self, target: &str) -> bool {
        self.associations.iter().any(|a| a.target() == target)
    }

    pub fn converter(&self, attribute: &str) -> Option<&Arc<dyn Converter>> {
        let attribute = attribute.to_lowercase();
        self.descriptor
            .converters
            .iter()
            .find(|(name, _)| *name == attribute)
            .map(|(_, c)| c)
    }

    pub fn validators(&self) -> &[Arc<dyn Validator>] {
        &self.descriptor.validators
    }

    pub fn callbacks(&self) -> &[Arc<dyn ModelCallbacks>] {
        &self.descriptor.callbacks
    }
}
