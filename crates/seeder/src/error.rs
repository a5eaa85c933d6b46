use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Invalid configuration for '{key}': {reason}")]
    Config { key: String, reason: String },

    #[error("Cannot load settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Cannot create database '{name}': {source}")]
    CreateDatabase {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Cannot create seeder table '{table}': {source}")]
    CreateSeedTable {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Cannot begin transaction for seed '{seed}': {source}")]
    Begin {
        seed: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Seed '{seed}' has no seeding function configured")]
    NotConfigured { seed: String },

    #[error("Seed '{seed}' lost its transaction while running '{fx}'")]
    MissingTransaction { seed: String, fx: String },

    #[error("cannot run seeding '{fx}' of seed '{seed}': {source}")]
    Step {
        seed: String,
        fx: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Commit error for seed '{seed}': {source}")]
    Commit {
        seed: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl SeedError {
    pub(crate) fn config(key: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
