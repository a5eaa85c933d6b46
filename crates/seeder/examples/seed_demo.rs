//! Example: bootstrap a database and apply two seeds.
//!
//! The first seed is a closure wrapped in [`FnSeed`]; the second is a custom
//! [`SeedExec`] implementation that keeps its own data.
//!
//! Run with:
//! ```
//! PG_DATABASE=kabestan_demo cargo run -p seeder --example seed_demo
//! ```
//!
//! Running it twice applies nothing the second time.

use seeder::prelude::*;
use tracing_subscriber::EnvFilter;

/// Inserts a fixed list of roles.
struct RolesSeed {
    roles: Vec<&'static str>,
    fx: Option<SeedFx<PgTx>>,
    tx: Option<PgTx>,
}

impl RolesSeed {
    fn new(roles: Vec<&'static str>) -> Self {
        let mut seed = Self {
            roles: roles.clone(),
            fx: None,
            tx: None,
        };
        seed.config(seed_fx(move |tx: &mut PgTx| {
            let roles = roles.clone();
            Box::pin(async move {
                for role in roles {
                    sqlx::query("INSERT INTO demo_roles (name) VALUES ($1) ON CONFLICT DO NOTHING")
                        .bind(role)
                        .execute(&mut **tx)
                        .await?;
                }
                Ok(())
            })
        }));
        seed
    }
}

impl SeedExec<PgTx> for RolesSeed {
    fn name(&self) -> &str {
        "demo_roles"
    }

    fn fx_name(&self) -> &str {
        "insert_roles"
    }

    fn config(&mut self, fx: SeedFx<PgTx>) {
        self.fx = Some(fx);
    }

    fn get_seed(&self) -> Option<SeedFx<PgTx>> {
        self.fx.clone()
    }

    fn set_tx(&mut self, tx: PgTx) {
        tracing::debug!("Inserting {} roles", self.roles.len());
        self.tx = Some(tx);
    }

    fn get_tx(&mut self) -> Option<&mut PgTx> {
        self.tx.as_mut()
    }

    fn take_tx(&mut self) -> Option<PgTx> {
        self.tx.take()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = PgSettings::from_config(&Config::load(None)?)?;
    let backend = PgBackend::connect(&settings).await?;
    let mut seeder = Seeder::from_settings(backend, &settings)?;

    seeder.add_seed(
        FnSeed::<PgTx>::new("demo_schema")
            .with_fx_name("create_roles_table")
            .with_fx(|tx| {
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        CREATE TABLE IF NOT EXISTS demo_roles (
                            name VARCHAR(64) PRIMARY KEY
                        )
                        "#,
                    )
                    .execute(&mut **tx)
                    .await?;
                    Ok(())
                })
            }),
    );
    seeder.add_seed(RolesSeed::new(vec!["admin", "editor", "viewer"]));

    seeder.seed().await?;

    for record in seeder.applied().await? {
        tracing::info!(
            "  {} ({})",
            record.name.unwrap_or_default(),
            record.fx.unwrap_or_default()
        );
    }

    Ok(())
}
