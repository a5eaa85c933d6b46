//! Database operations the seeder depends on.
//!
//! [`crate::db::PgBackend`] is the production implementation. Errors are
//! plain `sqlx::Error`s; the seeder adds the context.

use async_trait::async_trait;
use serde::Serialize;
use time::PrimitiveDateTime;
use uuid::Uuid;

/// Bookkeeping table name, created inside the configured schema.
pub const SEED_TABLE: &str = "seeds";

/// One row of the bookkeeping table.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SeedRecord {
    pub id: Uuid,
    pub name: Option<String>,
    pub fx: Option<String>,
    pub is_applied: Option<bool>,
    pub created_at: Option<PrimitiveDateTime>,
}

impl SeedRecord {
    /// A fresh "applied" row for `name`, stamped with the current UTC time.
    pub fn applied(name: &str, fx: &str) -> Self {
        let now = time::OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            name: Some(name.to_string()),
            fx: Some(fx.to_string()),
            is_applied: Some(true),
            created_at: Some(PrimitiveDateTime::new(now.date(), now.time())),
        }
    }
}

#[async_trait]
pub trait SeedBackend: Send + Sync {
    /// Transaction handle given to each seed.
    type Tx: Send + 'static;

    /// Catalog lookup for the target database, over the administrative
    /// connection.
    async fn database_exists(&self, db_name: &str) -> Result<bool, sqlx::Error>;

    /// Creates the target database over the administrative connection.
    async fn create_database(&self, db_name: &str) -> Result<(), sqlx::Error>;

    /// Catalog lookup for an ordinary table `schema.table`.
    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool, sqlx::Error>;

    async fn begin(&self) -> Result<Self::Tx, sqlx::Error>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), sqlx::Error>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), sqlx::Error>;

    /// Creates `schema.seeds` inside `tx`.
    async fn create_seed_table(
        &self,
        tx: &mut Self::Tx,
        schema: &str,
    ) -> Result<(), sqlx::Error>;

    async fn drop_seed_table(&self, schema: &str) -> Result<(), sqlx::Error>;

    /// Whether `name` has an applied row.
    async fn is_applied(&self, schema: &str, name: &str) -> Result<bool, sqlx::Error>;

    /// Records a seed as applied inside `tx`.
    async fn mark_applied(
        &self,
        tx: &mut Self::Tx,
        schema: &str,
        record: &SeedRecord,
    ) -> Result<(), sqlx::Error>;

    /// Deletes the applied rows of `name`, returning how many were removed.
    async fn unmark(&self, schema: &str, name: &str) -> Result<u64, sqlx::Error>;

    async fn list(&self, schema: &str) -> Result<Vec<SeedRecord>, sqlx::Error>;
}
