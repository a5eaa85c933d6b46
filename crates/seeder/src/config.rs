//! Seeder settings.
//!
//! [`Config`] is a key/value lookup (`pg.host`, `pg.port`, ...) layered from a
//! JSON file, `PG_*` environment variables and explicit overrides.
//! [`PgSettings`] resolves those keys, with defaults, into the administrative
//! and operational Postgres connections.

use std::path::Path;

use config::{Environment, File, FileFormat};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use url::Url;

use crate::error::SeedError;

/// Database used by the administrative connection.
pub const ADMIN_DATABASE: &str = "postgres";

/// Schema used by the administrative connection.
pub const ADMIN_SCHEMA: &str = "public";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: &str = "5432";
pub const DEFAULT_USER: &str = "kabestan";
pub const DEFAULT_PASSWORD: &str = "kabestan";
pub const DEFAULT_DATABASE: &str = "kabestan";
pub const DEFAULT_SCHEMA: &str = "public";

const ENV_PREFIX: &str = "PG";

/// Key/value settings lookup.
#[derive(Debug, Clone, Default)]
pub struct Config {
    inner: config::Config,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the optional JSON file at `path`, then overlays `PG_*`
    /// environment variables (`PG_HOST` sets `pg.host`).
    pub fn load(path: Option<&Path>) -> Result<Self, SeedError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Json));
        }
        let inner = builder.add_source(env_source(None)).build()?;
        Ok(Self { inner })
    }

    /// Parses JSON settings. Nested objects become dotted keys, so
    /// `{"pg": {"host": "db"}}` yields `pg.host = db`.
    pub fn from_json_str(raw: &str) -> Result<Self, SeedError> {
        let inner = config::Config::builder()
            .add_source(File::from_str(raw, FileFormat::Json))
            .build()?;
        Ok(Self { inner })
    }

    /// Overlays `PG_*` variables from the process environment.
    pub fn merge_env(self) -> Result<Self, SeedError> {
        self.overlay(env_source(None))
    }

    /// Overlays `PG_*` variables taken from `vars` instead of the process
    /// environment.
    pub fn merge_vars<I, K, V>(self, vars: I) -> Result<Self, SeedError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: config::Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.overlay(env_source(Some(vars)))
    }

    /// Sets explicit values on top of the sources loaded so far.
    pub fn with_overrides<I, K, V>(self, values: I) -> Result<Self, SeedError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut builder = config::Config::builder().add_source(self.inner);
        for (key, value) in values {
            builder = builder.set_override(key.as_ref(), value.into())?;
        }
        Ok(Self {
            inner: builder.build()?,
        })
    }

    fn overlay(self, env: Environment) -> Result<Self, SeedError> {
        let inner = config::Config::builder()
            .add_source(self.inner)
            .add_source(env)
            .build()?;
        Ok(Self { inner })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get_string(key).ok()
    }

    /// Returns the value stored under `key`, or `default` when it is unset or
    /// empty.
    pub fn val_or_def(&self, key: &str, default: &str) -> String {
        self.get(key)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}

fn env_source(vars: Option<config::Map<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("_")
        .keep_prefix(true)
        .source(vars)
}

/// Resolved Postgres connection settings.
#[derive(Debug, Clone)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub schema: String,
}

impl PgSettings {
    pub fn from_config(cfg: &Config) -> Result<Self, SeedError> {
        let port = cfg.val_or_def("pg.port", DEFAULT_PORT);
        let port = port
            .parse::<u16>()
            .map_err(|e| SeedError::config("pg.port", format!("'{port}' is not a port: {e}")))?;

        let settings = Self {
            host: cfg.val_or_def("pg.host", DEFAULT_HOST),
            port,
            user: cfg.val_or_def("pg.user", DEFAULT_USER),
            password: cfg.val_or_def("pg.password", DEFAULT_PASSWORD),
            database: fold_ident(
                "pg.database",
                &cfg.val_or_def("pg.database", DEFAULT_DATABASE),
            )?,
            schema: fold_ident("pg.schema", &cfg.val_or_def("pg.schema", DEFAULT_SCHEMA))?,
        };

        settings.build_url(&settings.database, &settings.schema)?;
        Ok(settings)
    }

    /// Connection string for the seed database and schema.
    pub fn url(&self) -> Result<String, SeedError> {
        Ok(self.build_url(&self.database, &self.schema)?.into())
    }

    /// Connection string for the administrative database, used to check for
    /// and create the seed database.
    pub fn admin_url(&self) -> Result<String, SeedError> {
        Ok(self.build_url(ADMIN_DATABASE, ADMIN_SCHEMA)?.into())
    }

    /// Same as [`PgSettings::url`] with the password masked, for logging.
    pub fn redacted_url(&self) -> Result<String, SeedError> {
        let mut url = self.build_url(&self.database, &self.schema)?;
        let _ = url.set_password(Some("***"));
        Ok(url.into())
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        self.build_options(&self.database, &self.schema)
    }

    pub fn admin_connect_options(&self) -> PgConnectOptions {
        self.build_options(ADMIN_DATABASE, ADMIN_SCHEMA)
    }

    fn build_url(&self, database: &str, schema: &str) -> Result<Url, SeedError> {
        let invalid = |key: &str| SeedError::config(key, "cannot be used in a connection URL");

        let mut url = Url::parse("postgres://localhost")
            .map_err(|e| SeedError::config("pg.host", e.to_string()))?;
        url.set_host(Some(&self.host))
            .map_err(|e| SeedError::config("pg.host", e.to_string()))?;
        url.set_port(Some(self.port)).map_err(|_| invalid("pg.port"))?;
        url.set_username(&self.user).map_err(|_| invalid("pg.user"))?;
        url.set_password(Some(&self.password))
            .map_err(|_| invalid("pg.password"))?;
        url.set_path(&format!("/{database}"));
        url.query_pairs_mut()
            .append_pair("sslmode", "disable")
            .append_pair("options", &format!("-c search_path={schema}"));
        Ok(url)
    }

    fn build_options(&self, database: &str, schema: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(database)
            .ssl_mode(PgSslMode::Disable)
            .options([("search_path", schema)])
    }
}

/// Lower-cases `ident` the way Postgres folds unquoted identifiers, then
/// validates it.
pub fn fold_ident(key: &str, ident: &str) -> Result<String, SeedError> {
    let folded = ident.to_ascii_lowercase();
    validate_ident(key, &folded)?;
    Ok(folded)
}

/// Rejects names that cannot be spliced unquoted into DDL.
pub fn validate_ident(key: &str, ident: &str) -> Result<(), SeedError> {
    if ident.is_empty() {
        return Err(SeedError::config(key, "must not be empty"));
    }
    if ident.len() > 63 {
        return Err(SeedError::config(key, "longer than 63 bytes"));
    }

    let mut chars = ident.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if !first_ok || !rest_ok {
        return Err(SeedError::config(
            key,
            format!("'{ident}' is not a plain SQL identifier"),
        ));
    }

    Ok(())
}
