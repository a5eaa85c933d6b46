//! Seeder maintenance CLI.
//!
//! Run with:
//! ```
//! cargo run -p seeder --bin seed -- setup
//! cargo run -p seeder --bin seed -- status --json
//! ```
//!
//! Seeds themselves are registered from code; see `examples/seed_demo.rs`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use seeder::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Postgres seeder maintenance.")]
struct Cli {
    /// JSON settings file (`{"pg": {"host": ..., "database": ...}}`).
    /// `PG_*` environment variables take precedence.
    #[arg(env = "SEEDER_CONFIG", short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database and the seeds table if missing.
    Setup,
    /// List recorded seeds.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Forget that a seed was applied so it runs again.
    Unmark { name: String },
    /// Drop the seeds table.
    DropTable,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let cfg = Config::load(cli.config.as_deref())?;
    let settings = PgSettings::from_config(&cfg)?;

    tracing::info!("Seeding target: {}", settings.redacted_url()?);

    let backend = PgBackend::connect(&settings).await?;
    let seeder = Seeder::from_settings(backend, &settings)?;

    match cli.cmd {
        Command::Setup => {
            seeder.pre_setup().await?;
            tracing::info!("Setup completed");
        }
        Command::Status { json } => {
            let records = seeder.applied().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                tracing::info!("{} recorded seeds:", records.len());
                for r in &records {
                    tracing::info!(
                        "  {:<32} fx={:<32} applied={} at={}",
                        r.name.as_deref().unwrap_or("-"),
                        r.fx.as_deref().unwrap_or("-"),
                        r.is_applied.unwrap_or(false),
                        r.created_at
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    );
                }
            }
        }
        Command::Unmark { name } => {
            let removed = seeder.unmark(&name).await?;
            if removed == 0 {
                tracing::warn!("Seed '{name}' was not recorded as applied");
            }
        }
        Command::DropTable => {
            seeder.drop_seed_table().await?;
        }
    }

    Ok(())
}
