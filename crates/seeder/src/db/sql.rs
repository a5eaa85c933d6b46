//! SQL for the catalog lookups and the bookkeeping table.
//!
//! Schema and database names are spliced in as identifiers; they are checked
//! by [`crate::config::fold_ident`] before they get here. Values go
//! through bind parameters.

use crate::backend::SEED_TABLE;

pub const DB_EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT datname FROM pg_catalog.pg_database WHERE lower(datname) = lower($1)
    )
"#;

pub const TABLE_EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT 1
        FROM   pg_catalog.pg_class c
        JOIN   pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE  n.nspname = $1
        AND    c.relname = $2
        AND    c.relkind = 'r'
    )
"#;

pub fn create_database(db_name: &str) -> String {
    format!("CREATE DATABASE {db_name}")
}

pub fn create_seed_table(schema: &str) -> String {
    format!(
        "CREATE TABLE {schema}.{SEED_TABLE} (
  id UUID PRIMARY KEY,
  name VARCHAR(64),
  fx VARCHAR(64),
  is_applied BOOLEAN,
  created_at TIMESTAMP
);"
    )
}

pub fn drop_seed_table(schema: &str) -> String {
    format!("DROP TABLE {schema}.{SEED_TABLE};")
}

pub fn select_applied(schema: &str) -> String {
    format!(
        "SELECT EXISTS (SELECT 1 FROM {schema}.{SEED_TABLE} WHERE name = $1 AND is_applied = true)"
    )
}

pub fn insert_applied(schema: &str) -> String {
    format!(
        "INSERT INTO {schema}.{SEED_TABLE} (id, name, fx, is_applied, created_at)
        VALUES ($1, $2, $3, $4, $5);"
    )
}

pub fn delete_applied(schema: &str) -> String {
    format!("DELETE FROM {schema}.{SEED_TABLE} WHERE name = $1 AND is_applied = true")
}

pub fn list(schema: &str) -> String {
    format!(
        "SELECT id, name, fx, is_applied, created_at FROM {schema}.{SEED_TABLE}
        ORDER BY created_at, name"
    )
}
