//! SQL dialects
//!
//! Every statement the engine generates goes through a [`Dialect`]. The
//! default implementations produce portable SQL; engine dialects override
//! paging, locking and placeholder syntax. Dialects are chosen from the
//! product name reported by the connection.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Row locking requested for a SELECT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    ForUpdate,
    ForUpdateNoWait,
    ForUpdateSkipLocked,
}

/// Column alias carrying the owning record id in many-to-many eager loads
pub const PARENT_RECORD_ALIAS: &str = "the_parent_record_id";

pub trait Dialect: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn select_star(&self, table: &str, where_clause: Option<&str>) -> String {
        match where_clause {
            Some(query) => format!("SELECT * FROM {} WHERE {}", table, query),
            None => format!("SELECT * FROM {}", table),
        }
    }

    /// `SELECT * FROM t WHERE a = ? AND b = ?`
    fn select_star_parametrized(&self, table: &str, columns: &[&str]) -> String {
        let conditions: Vec<String> = columns.iter().map(|c| format!("{} = ?", c)).collect();
        format!("SELECT * FROM {} WHERE {}", table, conditions.join(" AND "))
    }

    /// Build a select from a WHERE fragment (`table` is `Some`) or decorate a
    /// full query (`table` is `None`) with ordering, paging and locking.
    fn form_select(
        &self,
        table: Option<&str>,
        subquery: &str,
        order_bys: &[String],
        limit: Option<u64>,
        offset: Option<u64>,
        lock: LockMode,
    ) -> String {
        let mut query = match table {
            Some(table) => {
                let mut query = format!("SELECT * FROM {}", table);
                let fragment = subquery.trim();
                if !fragment.is_empty() {
                    if starts_with_clause(fragment, "ORDER BY") || starts_with_clause(fragment, "GROUP BY") {
                        query.push(' ');
                    } else {
                        query.push_str(" WHERE ");
                    }
                    query.push_str(fragment);
                }
                query
            }
            None => subquery.trim().to_string(),
        };

        if !order_bys.is_empty() {
            query.push_str(" ORDER BY ");
            query.push_str(&order_bys.join(", "));
        }
        self.append_paging(&mut query, limit, offset);
        if let Some(clause) = self.lock_clause(lock) {
            query.push(' ');
            query.push_str(clause);
        }
        query
    }

    /// ANSI paging; engines with `LIMIT` override this.
    fn append_paging(&self, query: &mut String, limit: Option<u64>, offset: Option<u64>) {
        if let Some(offset) = offset {
            query.push_str(&format!(" OFFSET {} ROWS", offset));
        }
        if let Some(limit) = limit {
            query.push_str(&format!(" FETCH FIRST {} ROWS ONLY", limit));
        }
    }

    fn lock_clause(&self, mode: LockMode) -> Option<&'static str> {
        match mode {
            LockMode::None => None,
            LockMode::ForUpdate => Some("FOR UPDATE"),
            LockMode::ForUpdateNoWait => Some("FOR UPDATE NOWAIT"),
            LockMode::ForUpdateSkipLocked => Some("FOR UPDATE SKIP LOCKED"),
        }
    }

    /// INSERT of the given columns; a version column is seeded with 1.
    fn insert(&self, table: &str, columns: &[String], version_column: Option<&str>) -> String {
        let mut names: Vec<&str> = columns.iter().map(String::as_str).collect();
        let mut values: Vec<&str> = vec!["?"; columns.len()];
        if let Some(version) = version_column {
            names.push(version);
            values.push("1");
        }
        if names.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", table);
        }
        format!("INSERT INTO {} ({}) VALUES ({})", table, names.join(", "), values.join(", "))
    }

    /// `UPDATE t SET a = ?, b = ? WHERE k1 = ? AND k2 = ?`
    fn update(&self, table: &str, set_columns: &[String], where_columns: &[String]) -> String {
        let sets: Vec<String> = set_columns.iter().map(|c| format!("{} = ?", c)).collect();
        let conditions: Vec<String> = where_columns.iter().map(|c| format!("{} = ?", c)).collect();
        format!("UPDATE {} SET {} WHERE {}", table, sets.join(", "), conditions.join(" AND "))
    }

    fn update_where(&self, table: &str, updates: &str, conditions: Option<&str>) -> String {
        match conditions {
            Some(conditions) => format!("UPDATE {} SET {} WHERE {}", table, updates, conditions),
            None => format!("UPDATE {} SET {}", table, updates),
        }
    }

    fn delete_by_keys(&self, table: &str, key_columns: &[String]) -> String {
        let conditions: Vec<String> = key_columns.iter().map(|c| format!("{} = ?", c)).collect();
        format!("DELETE FROM {} WHERE {}", table, conditions.join(" AND "))
    }

    fn delete_where(&self, table: &str, conditions: Option<&str>) -> String {
        match conditions {
            Some(conditions) => format!("DELETE FROM {} WHERE {}", table, conditions),
            None => format!("DELETE FROM {}", table),
        }
    }

    fn count(&self, table: &str, where_clause: Option<&str>) -> String {
        match where_clause {
            Some(query) => format!("SELECT COUNT(*) FROM {} WHERE {}", table, query),
            None => format!("SELECT COUNT(*) FROM {}", table),
        }
    }

    fn exists(&self, table: &str, id_name: &str) -> String {
        format!("SELECT {} FROM {} WHERE {} = ?", id_name, table, id_name)
    }

    /// Count query backing a paginator. Trailing ordering is dropped and
    /// grouped selects are counted as a derived table. `count_expression`
    /// goes inside `COUNT(...)`, e.g. `DISTINCT name`.
    fn paginator_count(&self, full_query: bool, query: &str, table: &str, count_expression: &str) -> String {
        let body = strip_order_by(query.trim());
        let select = if full_query {
            body.to_string()
        } else if body.is_empty() {
            format!("SELECT * FROM {}", table)
        } else if starts_with_clause(body, "GROUP BY") {
            format!("SELECT * FROM {} {}", table, body)
        } else {
            format!("SELECT * FROM {} WHERE {}", table, body)
        };
        if find_keyword(&select, "GROUP BY").is_some() {
            return format!("SELECT COUNT(*) FROM ({}) rowbound_count", select);
        }
        match find_keyword(&select, "FROM") {
            Some(pos) => format!("SELECT COUNT({}) {}", count_expression, &select[pos..]),
            None => format!("SELECT COUNT(*) FROM ({}) rowbound_count", select),
        }
    }

    /// Targets of a many-to-many association for a batch of source ids,
    /// each row tagged with the source id under [`PARENT_RECORD_ALIAS`].
    fn select_many_to_many(
        &self,
        target_table: &str,
        source_fk: &str,
        join_table: &str,
        target_pk: &str,
        target_fk: &str,
        id_count: usize,
    ) -> String {
        format!(
            "SELECT {target}.*, t.{source_fk} AS {alias} FROM {target} INNER JOIN {join} t ON {target}.{target_pk} = t.{target_fk} WHERE t.{source_fk} IN ({placeholders})",
            target = target_table,
            source_fk = source_fk,
            alias = PARENT_RECORD_ALIAS,
            join = join_table,
            target_pk = target_pk,
            target_fk = target_fk,
            placeholders = placeholders(id_count),
        )
    }

    /// Targets of a many-to-many association for one source id.
    fn select_many_to_many_for(
        &self,
        target_table: &str,
        join_table: &str,
        target_pk: &str,
        target_fk: &str,
        source_fk: &str,
    ) -> String {
        format!(
            "SELECT {target}.* FROM {target}, {join} WHERE {target}.{target_pk} = {join}.{target_fk} AND {join}.{source_fk} = ?",
            target = target_table,
            join = join_table,
            target_pk = target_pk,
            target_fk = target_fk,
            source_fk = source_fk,
        )
    }

    fn add_join_row(&self, join_table: &str, source_fk: &str, target_fk: &str) -> String {
        format!("INSERT INTO {} ({}, {}) VALUES (?, ?)", join_table, source_fk, target_fk)
    }

    fn remove_join_row(&self, join_table: &str, source_fk: &str, target_fk: &str) -> String {
        format!("DELETE FROM {} WHERE {} = ? AND {} = ?", join_table, source_fk, target_fk)
    }

    fn delete_join_rows(&self, join_table: &str, source_fk: &str) -> String {
        format!("DELETE FROM {} WHERE {} = ?", join_table, source_fk)
    }

    fn delete_children_shallow(&self, target_table: &str, fk_name: &str) -> String {
        format!("DELETE FROM {} WHERE {} = ?", target_table, fk_name)
    }

    fn delete_polymorphic_children(&self, target_table: &str) -> String {
        format!("DELETE FROM {} WHERE parent_id = ? AND parent_type = ?", target_table)
    }

    /// Rewrite generic `?` placeholders into the engine's native form.
    fn prepare_sql<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(sql)
    }
}

#[derive(Debug, Default)]
pub struct DefaultDialect;

impl Dialect for DefaultDialect {
    fn name(&self) -> &'static str {
        "default"
    }
}

#[derive(Debug, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn append_paging(&self, query: &mut String, limit: Option<u64>, offset: Option<u64>) {
        append_limit_offset(query, limit, offset);
    }

    fn prepare_sql<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        if count_placeholders(sql) == 0 {
            return Cow::Borrowed(sql);
        }
        let mut out = String::with_capacity(sql.len() + 8);
        let mut n = 0;
        for_each_unquoted(sql, |c, quoted| {
            if c == '?' && !quoted {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            } else {
                out.push(c);
            }
        });
        Cow::Owned(out)
    }
}

#[derive(Debug, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn append_paging(&self, query: &mut String, limit: Option<u64>, offset: Option<u64>) {
        // SQLite only accepts OFFSET after a LIMIT
        match (limit, offset) {
            (None, Some(offset)) => query.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            _ => append_limit_offset(query, limit, offset),
        }
    }

    fn lock_clause(&self, _mode: LockMode) -> Option<&'static str> {
        None
    }
}

#[derive(Debug, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn append_paging(&self, query: &mut String, limit: Option<u64>, offset: Option<u64>) {
        match (limit, offset) {
            (None, Some(offset)) => query.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {}", offset)),
            _ => append_limit_offset(query, limit, offset),
        }
    }

    fn insert(&self, table: &str, columns: &[String], version_column: Option<&str>) -> String {
        if columns.is_empty() && version_column.is_none() {
            return format!("INSERT INTO {} () VALUES ()", table);
        }
        DefaultDialect.insert(table, columns, version_column)
    }
}

/// Pick a dialect for a database product name.
pub fn dialect_for(product_name: &str) -> Arc<dyn Dialect> {
    let product = product_name.to_lowercase();
    if product.contains("postgres") {
        Arc::new(PostgresDialect)
    } else if product.contains("sqlite") {
        Arc::new(SqliteDialect)
    } else if product.contains("mysql") || product.contains("mariadb") {
        Arc::new(MySqlDialect)
    } else {
        Arc::new(DefaultDialect)
    }
}

fn append_limit_offset(query: &mut String, limit: Option<u64>, offset: Option<u64>) {
    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = offset {
        query.push_str(&format!(" OFFSET {}", offset));
    }
}

/// `?, ?, ?`
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Number of `?` placeholders outside quoted literals and identifiers.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    for_each_unquoted(sql, |c, quoted| {
        if c == '?' && !quoted {
            count += 1;
        }
    });
    count
}

fn for_each_unquoted(sql: &str, mut f: impl FnMut(char, bool)) {
    let mut quote: Option<char> = None;
    for c in sql.chars() {
        match quote {
            Some(q) if c == q => {
                f(c, true);
                quote = None;
            }
            Some(_) => f(c, true),
            None if c == '\'' || c == '"' => {
                f(c, true);
                quote = Some(c);
            }
            None => f(c, false),
        }
    }
}

fn starts_with_clause(fragment: &str, clause: &str) -> bool {
    let normalized: String = fragment
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();
    normalized.starts_with(clause)
}

/// Upper-cased copy with every whitespace character turned into a space;
/// byte offsets match the input.
fn normalized_upper(query: &str) -> String {
    query
        .chars()
        .map(|c| if c.is_ascii_whitespace() { ' ' } else { c.to_ascii_uppercase() })
        .collect()
}

fn find_keyword(query: &str, keyword: &str) -> Option<usize> {
    normalized_upper(query).find(&format!(" {} ", keyword)).map(|pos| pos + 1)
}

/// Drop a trailing top-level `ORDER BY` clause (and whatever paging follows it)
fn strip_order_by(query: &str) -> &str {
    let upper = normalized_upper(query);
    let cut = if upper.starts_with("ORDER BY ") {
        Some(0)
    } else {
        upper.rfind(" ORDER BY ")
    };
    match cut {
        Some(pos) if !upper[pos..].contains(')') => query[..pos].trim_end(),
        _ => query,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_select_with_where_fragment() {
        let d = DefaultDialect;
        assert_eq!(
            d.form_select(Some("people"), "name = ?", &[], None, None, LockMode::None),
            "SELECT * FROM people WHERE name = ?"
        );
        assert_eq!(
            d.form_select(Some("people"), "", &["id".to_string()], None, None, LockMode::None),
            "SELECT * FROM people ORDER BY id"
        );
        assert_eq!(
            d.form_select(Some("people"), "order by name", &[], None, None, LockMode::None),
            "SELECT * FROM people order by name"
        );
    }

    #[test]
    fn test_paging_per_engine() {
        let order = vec!["id".to_string()];
        assert_eq!(
            SqliteDialect.form_select(Some("t"), "", &order, Some(10), Some(20), LockMode::None),
            "SELECT * FROM t ORDER BY id LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            SqliteDialect.form_select(Some("t"), "", &[], None, Some(5), LockMode::None),
            "SELECT * FROM t LIMIT -1 OFFSET 5"
        );
        assert_eq!(
            DefaultDialect.form_select(Some("t"), "", &[], Some(10), Some(20), LockMode::None),
            "SELECT * FROM t OFFSET 20 ROWS FETCH FIRST 10 ROWS ONLY"
        );
        assert_eq!(
            PostgresDialect.form_select(None, "SELECT * FROM t", &[], Some(1), None, LockMode::ForUpdate),
            "SELECT * FROM t LIMIT 1 FOR UPDATE"
        );
        assert_eq!(
            SqliteDialect.form_select(Some("t"), "a = 1", &[], None, None, LockMode::ForUpdate),
            "SELECT * FROM t WHERE a = 1"
        );
    }

    #[test]
    fn test_insert_seeds_version() {
        let d = DefaultDialect;
        assert_eq!(
            d.insert("accounts", &["amount".to_string()], Some("record_version")),
            "INSERT INTO accounts (amount, record_version) VALUES (?, 1)"
        );
        assert_eq!(d.insert("empty", &[], None), "INSERT INTO empty DEFAULT VALUES");
        assert_eq!(MySqlDialect.insert("empty", &[], None), "INSERT INTO empty () VALUES ()");
    }

    #[test]
    fn test_postgres_placeholder_rewrite_skips_literals() {
        let d = PostgresDialect;
        assert_eq!(
            d.prepare_sql("SELECT * FROM t WHERE a = ? AND b = '?' AND c = ?"),
            "SELECT * FROM t WHERE a = $1 AND b = '?' AND c = $2"
        );
        assert!(matches!(d.prepare_sql("SELECT 1"), Cow::Borrowed(_)));
        assert_eq!(SqliteDialect.prepare_sql("a = ?"), "a = ?");
    }

    #[test]
    fn test_count_placeholders() {
        assert_eq!(count_placeholders("a = ? AND b = ?"), 2);
        assert_eq!(count_placeholders("a = '?' AND \"b?\" = 1"), 0);
        assert_eq!(count_placeholders("note = 'it''s ?' AND x = ?"), 1);
    }

    #[test]
    fn test_many_to_many_select() {
        let sql = DefaultDialect.select_many_to_many("patients", "doctor_id", "doctors_patients", "id", "patient_id", 2);
        assert_eq!(
            sql,
            "SELECT patients.*, t.doctor_id AS the_parent_record_id FROM patients INNER JOIN doctors_patients t ON patients.id = t.patient_id WHERE t.doctor_id IN (?, ?)"
        );
    }

    #[test]
    fn test_paginator_count() {
        let d = DefaultDialect;
        assert_eq!(d.paginator_count(false, "name = ?", "people", "*"), "SELECT COUNT(*) FROM people WHERE name = ?");
        assert_eq!(d.paginator_count(false, "", "people", "*"), "SELECT COUNT(*) FROM people");
        assert_eq!(
            d.paginator_count(true, "SELECT p.* FROM people p WHERE p.age > ?", "people", "*"),
            "SELECT COUNT(*) FROM people p WHERE p.age > ?"
        );
        assert_eq!(
            d.paginator_count(false, "name IS NOT NULL", "people", "DISTINCT last_name"),
            "SELECT COUNT(DISTINCT last_name) FROM people WHERE name IS NOT NULL"
        );
    }

    #[test]
    fn test_paginator_count_drops_ordering() {
        let d = DefaultDialect;
        assert_eq!(d.paginator_count(false, "ORDER BY degrees DESC", "t", "*"), "SELECT COUNT(*) FROM t");
        assert_eq!(
            d.paginator_count(false, "degrees > ? order by\ndegrees", "t", "*"),
            "SELECT COUNT(*) FROM t WHERE degrees > ?"
        );
        assert_eq!(
            d.paginator_count(true, "SELECT * FROM t WHERE degrees > ? ORDER BY degrees DESC", "t", "*"),
            "SELECT COUNT(*) FROM t WHERE degrees > ?"
        );
        assert_eq!(
            d.paginator_count(true, "SELECT * FROM t WHERE id IN (SELECT id FROM u ORDER BY id)", "t", "*"),
            "SELECT COUNT(*) FROM t WHERE id IN (SELECT id FROM u ORDER BY id)"
        );
    }

    #[test]
    fn test_paginator_count_wraps_groups() {
        let d = DefaultDialect;
        assert_eq!(
            d.paginator_count(false, "GROUP BY degrees ORDER BY degrees", "t", "*"),
            "SELECT COUNT(*) FROM (SELECT * FROM t GROUP BY degrees) rowbound_count"
        );
    }

    #[test]
    fn test_dialect_for_product() {
        assert_eq!(dialect_for("PostgreSQL").name(), "postgresql");
        assert_eq!(dialect_for("SQLite").name(), "sqlite");
        assert_eq!(dialect_for("MariaDB").name(), "mysql");
        assert_eq!(dialect_for("H2").name(), "default");
    }
}
