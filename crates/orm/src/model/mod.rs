//! Entity instances
//!
//! A [`Model`] is one row of a mapped table: an attribute bag keyed by
//! lower-cased column name, with dirty tracking, a frozen state after
//! delete and the parents/children an eager load attached to it.
//!
//! - `persistence`: save, insert, update, delete and cascades
//! - `relations`: parent/children lookups and association writes
//! - `conversion`: attribute converters
//! - `callbacks`: lifecycle hooks

pub mod callbacks;
pub mod conversion;
mod persistence;
mod relations;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::{OrmError, OrmResult};
use crate::inflector;
use crate::metadata::MetaModel;
use crate::validation::Errors;
use crate::value::{DatabaseValue, RowMap};

pub use relations::Related;

use callbacks::Hook;

#[derive(Debug, Clone)]
pub struct Model {
    meta: Arc<MetaModel>,
    attributes: BTreeMap<String, DatabaseValue>,
    dirty: BTreeSet<String>,
    frozen: bool,
    persisted: bool,
    parents: HashMap<String, Model>,
    children: HashMap<String, Vec<Model>>,
    errors: Errors,
}

impl Model {
    /// A new, empty instance
    pub fn new(meta: Arc<MetaModel>) -> Self {
        Self {
            meta,
            attributes: BTreeMap::new(),
            dirty: BTreeSet::new(),
            frozen: false,
            persisted: false,
            parents: HashMap::new(),
            children: HashMap::new(),
            errors: Errors::new(),
        }
    }

    /// An instance hydrated from a result row
    pub(crate) fn from_row(meta: Arc<MetaModel>, row: RowMap) -> Self {
        let mut model = Self::new(meta);
        model.attributes = row
            .into_iter_pairs()
            .map(|(column, value)| (column.to_lowercase(), value))
            .collect();
        model.persisted = true;
        model
    }

    /// A new instance with attributes set from name/value pairs
    pub fn from_map<I, K, V>(meta: Arc<MetaModel>, values: I) -> OrmResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<DatabaseValue>,
    {
        let mut model = Self::new(meta);
        model.set_many(values)?;
        Ok(model)
    }

    pub fn meta(&self) -> &Arc<MetaModel> {
        &self.meta
    }

    pub fn type_name(&self) -> &str {
        self.meta.type_name()
    }

    /// Read an attribute, passing it through the attribute's converter.
    ///
    /// A known column that has not been set reads as `Null`; a name that
    /// is neither a column nor a loaded attribute is an error.
    pub fn get(&self, name: &str) -> OrmResult<DatabaseValue> {
        self.ensure_not_frozen()?;
        self.meta.check_table()?;
        let key = name.to_lowercase();
        let value = match self.attributes.get(&key) {
            Some(value) => value.clone(),
            None if self.meta.has_attribute(&key) => DatabaseValue::Null,
            None => {
                return Err(OrmError::AttributeNotFound {
                    attribute: name.to_string(),
                    table: self.meta.table_name().to_string(),
                })
            }
        };
        match self.meta.converter(&key) {
            Some(converter) => converter.from_db(value),
            None => Ok(value),
        }
    }

    /// Raw stored value, without conversion or state checks
    pub fn attribute(&self, name: &str) -> Option<&DatabaseValue> {
        self.attributes.get(&name.to_lowercase())
    }

    /// Set a column value and mark it dirty.
    pub fn set(&mut self, name: &str, value: impl Into<DatabaseValue>) -> OrmResult<&mut Self> {
        self.ensure_not_frozen()?;
        self.meta.check_table()?;
        let key = name.to_lowercase();
        if !self.meta.has_attribute(&key) {
            return Err(OrmError::AttributeNotFound {
                attribute: name.to_string(),
                table: self.meta.table_name().to_string(),
            });
        }
        let value = match self.meta.converter(&key) {
            Some(converter) => converter.to_db(value.into())?,
            None => value.into(),
        };
        self.attributes.insert(key.clone(), value);
        self.dirty.insert(key);
        Ok(self)
    }

    pub fn set_many<I, K, V>(&mut self, values: I) -> OrmResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<DatabaseValue>,
    {
        for (name, value) in values {
            self.set(name.as_ref(), value)?;
        }
        Ok(self)
    }

    /// Set `name` to `value` only if it currently equals `expected`.
    pub fn compare_and_set(
        &mut self,
        name: &str,
        expected: impl Into<DatabaseValue>,
        value: impl Into<DatabaseValue>,
    ) -> OrmResult<bool> {
        if self.get(name)? != expected.into() {
            return Ok(false);
        }
        self.set(name, value)?;
        Ok(true)
    }

    pub fn get_string(&self, name: &str) -> OrmResult<Option<String>> {
        Ok(match self.get(name)? {
            DatabaseValue::Null => None,
            DatabaseValue::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    pub fn get_i64(&self, name: &str) -> OrmResult<Option<i64>> {
        let value = self.get(name)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_i64()
            .map(Some)
            .ok_or_else(|| self.conversion_error(name, &value, "an integer"))
    }

    pub fn get_f64(&self, name: &str) -> OrmResult<Option<f64>> {
        let value = self.get(name)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_f64()
            .map(Some)
            .ok_or_else(|| self.conversion_error(name, &value, "a number"))
    }

    pub fn get_bool(&self, name: &str) -> OrmResult<Option<bool>> {
        let value = self.get(name)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_bool()
            .map(Some)
            .ok_or_else(|| self.conversion_error(name, &value, "a boolean"))
    }

    pub fn get_datetime(&self, name: &str) -> OrmResult<Option<DateTime<Utc>>> {
        let value = self.get(name)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_datetime()
            .map(Some)
            .ok_or_else(|| self.conversion_error(name, &value, "a timestamp"))
    }

    fn conversion_error(&self, name: &str, value: &DatabaseValue, expected: &str) -> OrmError {
        OrmError::Query(format!(
            "attribute '{}' of '{}' holds {:?}, which is not {}",
            name,
            self.meta.table_name(),
            value,
            expected
        ))
    }

    /// Primary key value; `None` while unset
    pub fn id(&self) -> Option<&DatabaseValue> {
        self.attributes
            .get(&self.meta.id_name().to_lowercase())
            .filter(|v| !v.is_null())
    }

    pub fn long_id(&self) -> Option<i64> {
        self.id().and_then(DatabaseValue::as_i64)
    }

    pub fn set_id(&mut self, id: impl Into<DatabaseValue>) -> OrmResult<&mut Self> {
        let id_name = self.meta.id_name().to_string();
        self.set(&id_name, id)
    }

    /// Values of the key columns, in key order
    pub(crate) fn key_values(&self) -> OrmResult<Vec<DatabaseValue>> {
        self.meta
            .key_columns()
            .iter()
            .map(|column| match self.attributes.get(&column.to_lowercase()) {
                Some(value) if !value.is_null() => Ok(value.clone()),
                _ => Err(OrmError::IllegalArgument(format!(
                    "key column '{}' of '{}' is not set",
                    column,
                    self.meta.table_name()
                ))),
            })
            .collect()
    }

    /// Identity used in error messages and cascade bookkeeping
    pub(crate) fn identity(&self) -> String {
        self.meta
            .key_columns()
            .iter()
            .map(|c| self.attributes.get(&c.to_lowercase()).map(DatabaseValue::key).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// New until a primary key is assigned; with composite keys, until the
    /// row was inserted or loaded.
    pub fn is_new(&self) -> bool {
        if self.meta.has_composite_keys() {
            !self.persisted
        } else {
            self.id().is_none()
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_modified(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn modified_attributes(&self) -> Vec<&str> {
        self.dirty.iter().map(String::as_str).collect()
    }

    /// Make a deleted instance usable again as a new one. The primary key
    /// is cleared; every other attribute is kept and will be inserted.
    pub fn thaw(&mut self) {
        self.frozen = false;
        self.persisted = false;
        if !self.meta.has_composite_keys() {
            self.attributes.remove(&self.meta.id_name().to_lowercase());
        }
        if let Some(version) = self.meta.version_column() {
            self.attributes.remove(&version.to_lowercase());
        }
        self.dirty = self.attributes.keys().cloned().collect();
    }

    /// Drop every attribute and cached association.
    pub fn reset(&mut self) {
        self.attributes.clear();
        self.dirty.clear();
        self.parents.clear();
        self.children.clear();
        self.errors.clear();
        self.frozen = false;
        self.persisted = false;
    }

    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    /// Run the registered validators; returns true when there were no errors.
    pub fn validate(&mut self) -> bool {
        let meta = Arc::clone(&self.meta);
        let mut errors = Errors::new();
        for validator in meta.validators() {
            validator.validate(self, &mut errors);
        }
        self.errors = errors;
        self.errors.is_empty()
    }

    pub async fn is_valid(&mut self) -> OrmResult<bool> {
        callbacks::trigger(self, Hook::BeforeValidation).await?;
        let valid = self.validate();
        callbacks::trigger(self, Hook::AfterValidation).await?;
        Ok(valid)
    }

    /// Attributes as stored, keyed by lower-cased column name
    pub fn to_map(&self) -> BTreeMap<String, DatabaseValue> {
        self.attributes.clone()
    }

    /// Attributes plus eager-loaded parents and children as JSON
    pub fn to_json(&self) -> JsonValue {
        let mut object: serde_json::Map<String, JsonValue> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        for (type_name, parent) in &self.parents {
            object.insert(inflector::underscore(inflector::short_type_name(type_name)), parent.to_json());
        }
        for (type_name, children) in &self.children {
            object.insert(
                inflector::table_name_for(type_name),
                JsonValue::Array(children.iter().map(Model::to_json).collect()),
            );
        }
        JsonValue::Object(object)
    }

    /// Parent attached by an eager load
    pub fn cached_parent(&self, type_name: &str) -> Option<&Model> {
        self.parents.get(type_name)
    }

    /// Children attached by an eager load
    pub fn cached_children(&self, type_name: &str) -> Option<&[Model]> {
        self.children.get(type_name).map(Vec::as_slice)
    }

    pub(crate) fn set_cached_parent(&mut self, type_name: &str, parent: Model) {
        self.parents.insert(type_name.to_string(), parent);
    }

    pub(crate) fn set_cached_children(&mut self, type_name: &str, children: Vec<Model>) {
        self.children.insert(type_name.to_string(), children);
    }

    fn ensure_not_frozen(&self) -> OrmResult<()> {
        if self.frozen {
            return Err(OrmError::Frozen {
                table: self.meta.table_name().to_string(),
                id: self.identity(),
            });
        }
        Ok(())
    }

    /// Store a value without conversion or dirty tracking
    pub(crate) fn put_raw(&mut self, name: &str, value: DatabaseValue) {
        self.attributes.insert(name.to_lowercase(), value);
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty.clear();
        self.persisted = true;
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn replace_attributes(&mut self, row: RowMap) {
        self.attributes = row
            .into_iter_pairs()
            .map(|(column, value)| (column.to_lowercase(), value))
            .collect();
        self.dirty.clear();
    }
}

/// Hydrate rows into models, running `after_load` hooks.
pub(crate) async fn hydrate(meta: &Arc<MetaModel>, rows: Vec<RowMap>) -> OrmResult<Vec<Model>> {
    let mut models = Vec::with_capacity(rows.len());
    for row in rows {
        let mut model = Model::from_row(Arc::clone(meta), row);
        callbacks::trigger(&mut model, Hook::AfterLoad).await?;
        models.push(model);
    }
    Ok(models)
}
