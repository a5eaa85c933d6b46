//! Postgres seed runner.
//!
//! A [`Seeder`] makes sure the target database and its `<schema>.seeds`
//! bookkeeping table exist, then runs every registered seed in registration
//! order, each inside its own transaction. A seed that fails is rolled back
//! and stops the run; seeds that succeed are recorded and skipped next time.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use seeder::prelude::*;
//!
//! let settings = PgSettings::from_config(&Config::load(None)?)?;
//! let backend = PgBackend::connect(&settings).await?;
//! let mut seeder = Seeder::from_settings(backend, &settings)?;
//!
//! seeder.add_seed(FnSeed::<PgTx>::new("roles").with_fx(|tx| {
//!     Box::pin(async move {
//!         sqlx::query("INSERT INTO roles (name) VALUES ('admin')")
//!             .execute(&mut **tx)
//!             .await?;
//!         Ok(())
//!     })
//! }));
//!
//! seeder.seed().await?;
//! ```

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod exec;
pub mod seeder;

pub use error::SeedError;
pub use seeder::Seeder;

pub mod prelude {
    //! Convenient re-exports for common usage.

    pub use crate::backend::{SEED_TABLE, SeedBackend, SeedRecord};
    pub use crate::config::{Config, PgSettings};
    pub use crate::db::{PgBackend, PgTx};
    pub use crate::error::SeedError;
    pub use crate::exec::{FnSeed, SeedExec, SeedFuture, SeedFx, seed_fx};
    pub use crate::seeder::Seeder;
}
