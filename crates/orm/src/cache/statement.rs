//! Per-connection statement cache
//!
//! The generated-key insert path runs its statements as persistent
//! prepared statements; the driver keeps them per connection. This cache
//! records which statements were prepared so they can be dropped together
//! when the connection is detached or closed.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct StatementCache {
    statements: HashMap<String, u64>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a use of `sql`; returns true the first time it is seen.
    pub fn record(&mut self, sql: &str) -> bool {
        match self.statements.get_mut(sql) {
            Some(uses) => {
                *uses += 1;
                false
            }
            None => {
                self.statements.insert(sql.to_string(), 1);
                true
            }
        }
    }

    pub fn contains(&self, sql: &str) -> bool {
        self.statements.contains_key(sql)
    }

    pub fn uses(&self, sql: &str) -> u64 {
        self.statements.get(sql).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn clear(&mut self) {
        self.statements.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_uses() {
        let mut cache = StatementCache::new();
        assert!(cache.record("INSERT INTO people (name) VALUES (?)"));
        assert!(!cache.record("INSERT INTO people (name) VALUES (?)"));
        assert_eq!(cache.uses("INSERT INTO people (name) VALUES (?)"), 2);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
