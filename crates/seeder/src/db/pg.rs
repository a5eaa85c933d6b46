use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use super::sql;
use crate::backend::{SeedBackend, SeedRecord};
use crate::config::PgSettings;
use crate::error::SeedError;

/// Transaction handed to Postgres seeds.
pub type PgTx = Transaction<'static, Postgres>;

/// Postgres backend.
///
/// Holds two pools: `admin` talks to the `postgres` database and is only used
/// to look up and create the seed database, `pool` talks to the seed database
/// itself.
#[derive(Clone)]
pub struct PgBackend {
    admin: PgPool,
    pool: PgPool,
}

impl PgBackend {
    pub fn new(admin: PgPool, pool: PgPool) -> Self {
        Self { admin, pool }
    }

    /// Connects the administrative pool and prepares a lazy pool for the seed
    /// database, which may not exist yet.
    pub async fn connect(settings: &PgSettings) -> Result<Self, SeedError> {
        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(settings.admin_connect_options())
            .await
            .map_err(SeedError::Connection)?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy_with(settings.connect_options());

        info!(
            "Connected to {}:{} as {}",
            settings.host, settings.port, settings.user
        );
        Ok(Self::new(admin, pool))
    }

    /// Returns a reference to the seed database pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SeedBackend for PgBackend {
    type Tx = PgTx;

    async fn database_exists(&self, db_name: &str) -> Result<bool, sqlx::Error> {
        let exists: Option<bool> = sqlx::query_scalar(sql::DB_EXISTS)
            .bind(db_name)
            .fetch_one(&self.admin)
            .await?;
        Ok(exists.unwrap_or(false))
    }

    async fn create_database(&self, db_name: &str) -> Result<(), sqlx::Error> {
        sqlx::query(&sql::create_database(db_name))
            .execute(&self.admin)
            .await?;
        Ok(())
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool, sqlx::Error> {
        let exists: Option<bool> = sqlx::query_scalar(sql::TABLE_EXISTS)
            .bind(schema)
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists.unwrap_or(false))
    }

    async fn begin(&self) -> Result<PgTx, sqlx::Error> {
        self.pool.begin().await
    }

    async fn commit(&self, tx: PgTx) -> Result<(), sqlx::Error> {
        tx.commit().await
    }

    async fn rollback(&self, tx: PgTx) -> Result<(), sqlx::Error> {
        tx.rollback().await
    }

    async fn create_seed_table(&self, tx: &mut PgTx, schema: &str) -> Result<(), sqlx::Error> {
        sqlx::query(&sql::create_seed_table(schema))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn drop_seed_table(&self, schema: &str) -> Result<(), sqlx::Error> {
        sqlx::query(&sql::drop_seed_table(schema))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_applied(&self, schema: &str, name: &str) -> Result<bool, sqlx::Error> {
        let applied: Option<bool> = sqlx::query_scalar(&sql::select_applied(schema))
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(applied.unwrap_or(false))
    }

    async fn mark_applied(
        &self,
        tx: &mut PgTx,
        schema: &str,
        record: &SeedRecord,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&sql::insert_applied(schema))
            .bind(record.id)
            .bind(&record.name)
            .bind(&record.fx)
            .bind(record.is_applied)
            .bind(record.created_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn unmark(&self, schema: &str, name: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(&sql::delete_applied(schema))
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list(&self, schema: &str) -> Result<Vec<SeedRecord>, sqlx::Error> {
        sqlx::query_as(&sql::list(schema))
            .fetch_all(&self.pool)
            .await
    }
}
