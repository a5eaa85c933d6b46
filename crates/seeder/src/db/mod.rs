//! Postgres integration for the seeder.
//!
//! [`PgBackend`] implements [`crate::backend::SeedBackend`] over sqlx pools;
//! the statements it runs live in [`sql`].

mod pg;
pub mod sql;

pub use pg::{PgBackend, PgTx};
