//! Process-wide query cache
//!
//! Entries are grouped per `(database, table)` so a write can drop every
//! cached result for a table in one step. Within a table, results are
//! keyed by the exact SQL text and the typed parameter values.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::model::Model;
use crate::value::DatabaseValue;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TableKey {
    db: String,
    table: String,
}

impl TableKey {
    fn new(db: &str, table: &str) -> Self {
        Self {
            db: db.to_string(),
            table: table.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    sql: String,
    params: Vec<String>,
}

impl QueryKey {
    fn new(sql: &str, params: &[DatabaseValue]) -> Self {
        Self {
            sql: sql.to_string(),
            params: params.iter().map(DatabaseValue::cache_token).collect(),
        }
    }
}

/// A cached result: a materialized list or a single value
#[derive(Debug, Clone)]
pub enum CachedValue {
    Models(Arc<Vec<Model>>),
    Scalar(DatabaseValue),
}

/// Cache counters
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    purges: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub purges: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
pub struct QueryCache {
    enabled: bool,
    tables: DashMap<TableKey, HashMap<QueryKey, CachedValue>>,
    metrics: CacheMetrics,
}

impl QueryCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            tables: DashMap::new(),
            metrics: CacheMetrics::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, db: &str, table: &str, sql: &str, params: &[DatabaseValue]) -> Option<CachedValue> {
        if !self.enabled {
            return None;
        }
        let found = self
            .tables
            .get(&TableKey::new(db, table))
            .and_then(|entries| entries.get(&QueryKey::new(sql, params)).cloned());
        let counter = if found.is_some() { &self.metrics.hits } else { &self.metrics.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn put(&self, db: &str, table: &str, sql: &str, params: &[DatabaseValue], value: CachedValue) {
        if !self.enabled {
            return;
        }
        self.tables
            .entry(TableKey::new(db, table))
            .or_default()
            .insert(QueryKey::new(sql, params), value);
        self.metrics.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every entry cached for a table.
    pub fn purge_table(&self, db: &str, table: &str) {
        if self.tables.remove(&TableKey::new(db, table)).is_some() {
            self.metrics.purges.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        self.tables.clear();
    }

    /// Number of cached results for a table
    pub fn entries_for(&self, db: &str, table: &str) -> usize {
        self.tables
            .get(&TableKey::new(db, table))
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            puts: self.metrics.puts.load(Ordering::Relaxed),
            purges: self.metrics.purges.load(Ordering::Relaxed),
        }
    }
}
