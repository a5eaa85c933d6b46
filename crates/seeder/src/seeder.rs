//! Seed runner.

use tracing::{error, info, warn};

use crate::backend::{SEED_TABLE, SeedBackend, SeedRecord};
use crate::config::{PgSettings, fold_ident};
use crate::error::SeedError;
use crate::exec::{Seed, SeedExec};

/// Outcome of one registered seed within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeedStatus {
    Applied,
    Skipped,
}

/// Applies registered seeds, in registration order, once each.
pub struct Seeder<B: SeedBackend> {
    backend: B,
    schema: String,
    db_name: String,
    seeds: Vec<Seed<B::Tx>>,
}

impl<B: SeedBackend> Seeder<B> {
    /// Creates a seeder for `db_name`, keeping its bookkeeping in `schema`.
    ///
    /// Both names are folded to lower case, as Postgres does for the unquoted
    /// identifiers in the generated DDL.
    pub fn new(backend: B, schema: &str, db_name: &str) -> Result<Self, SeedError> {
        let schema = fold_ident("pg.schema", schema)?;
        let db_name = fold_ident("pg.database", db_name)?;

        Ok(Self {
            backend,
            schema,
            db_name,
            seeds: Vec::new(),
        })
    }

    pub fn from_settings(backend: B, settings: &PgSettings) -> Result<Self, SeedError> {
        Self::new(backend, &settings.schema, &settings.database)
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of registered seeds.
    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// Registers a seed. Seeds run in the order they were added.
    pub fn add_seed<E>(&mut self, executor: E)
    where
        E: SeedExec<B::Tx> + 'static,
    {
        self.seeds.push(Seed {
            executor: Box::new(executor),
        });
    }

    /// Creates the target database and the bookkeeping table when the catalog
    /// says they are missing.
    pub async fn pre_setup(&self) -> Result<(), SeedError> {
        if !self.db_exists().await {
            self.create_db().await?;
        }

        if !self.seed_table_exists().await {
            self.create_seed_table().await?;
        }

        Ok(())
    }

    async fn db_exists(&self) -> bool {
        match self.backend.database_exists(&self.db_name).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Error checking database '{}': {e}", self.db_name);
                false
            }
        }
    }

    async fn seed_table_exists(&self) -> bool {
        match self.backend.table_exists(&self.schema, SEED_TABLE).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Error checking table '{}.{SEED_TABLE}': {e}", self.schema);
                false
            }
        }
    }

    async fn create_db(&self) -> Result<(), SeedError> {
        self.backend
            .create_database(&self.db_name)
            .await
            .map_err(|source| SeedError::CreateDatabase {
                name: self.db_name.clone(),
                source,
            })?;

        info!("Database created: {}", self.db_name);
        Ok(())
    }

    async fn create_seed_table(&self) -> Result<(), SeedError> {
        let table = format!("{}.{SEED_TABLE}", self.schema);
        let create_err = |source| SeedError::CreateSeedTable {
            table: table.clone(),
            source,
        };

        let mut tx = self.backend.begin().await.map_err(create_err)?;

        if let Err(e) = self.backend.create_seed_table(&mut tx, &self.schema).await {
            if let Err(rb) = self.backend.rollback(tx).await {
                warn!("Rollback failed: {rb}");
            }
            return Err(create_err(e));
        }

        self.backend.commit(tx).await.map_err(create_err)?;

        info!("Seeder table created: {table}");
        Ok(())
    }

    /// Runs every registered seed that has not been applied yet.
    ///
    /// Each seed gets its own transaction. The first failing seed is rolled
    /// back and ends the run; seeds committed before it stay committed.
    pub async fn seed(&mut self) -> Result<(), SeedError> {
        self.pre_setup().await?;

        let mut applied = 0;
        let mut skipped = 0;
        for seed in &mut self.seeds {
            match run_seed(&self.backend, &self.schema, seed.executor.as_mut()).await? {
                SeedStatus::Applied => applied += 1,
                SeedStatus::Skipped => skipped += 1,
            }
        }

        info!("Seeding done: {applied} applied, {skipped} already applied");
        Ok(())
    }

    /// Lists the bookkeeping rows.
    pub async fn applied(&self) -> Result<Vec<SeedRecord>, SeedError> {
        Ok(self.backend.list(&self.schema).await?)
    }

    /// Forgets that `name` was applied so the next run executes it again.
    pub async fn unmark(&self, name: &str) -> Result<u64, SeedError> {
        let removed = self.backend.unmark(&self.schema, name).await?;
        info!("Unmarked seed '{name}' ({removed} rows)");
        Ok(removed)
    }

    /// Drops the bookkeeping table.
    pub async fn drop_seed_table(&self) -> Result<(), SeedError> {
        self.backend.drop_seed_table(&self.schema).await?;
        info!("Seeder table dropped: {}.{SEED_TABLE}", self.schema);
        Ok(())
    }
}

async fn run_seed<B: SeedBackend>(
    backend: &B,
    schema: &str,
    exec: &mut dyn SeedExec<B::Tx>,
) -> Result<SeedStatus, SeedError> {
    let name = exec.name().to_string();
    let fx_name = exec.fx_name().to_string();

    let Some(fx) = exec.get_seed() else {
        return Err(SeedError::NotConfigured { seed: name });
    };

    if backend.is_applied(schema, &name).await? {
        info!("Seed step already applied: {fx_name}");
        return Ok(SeedStatus::Skipped);
    }

    let tx = backend.begin().await.map_err(|source| SeedError::Begin {
        seed: name.clone(),
        source,
    })?;
    exec.set_tx(tx);

    let outcome = match exec.get_tx() {
        Some(tx) => fx(tx).await,
        None => {
            return Err(SeedError::MissingTransaction {
                seed: name,
                fx: fx_name,
            });
        }
    };

    if let Err(source) = outcome {
        error!("Seed step not executed: {fx_name}: {source:#}");
        match exec.take_tx() {
            Some(tx) => {
                if let Err(rb) = backend.rollback(tx).await {
                    warn!("Rollback failed: {rb}");
                }
            }
            None => warn!("Seed '{name}' kept no transaction to roll back"),
        }
        return Err(SeedError::Step {
            seed: name,
            fx: fx_name,
            source,
        });
    }

    let Some(mut tx) = exec.take_tx() else {
        return Err(SeedError::MissingTransaction {
            seed: name,
            fx: fx_name,
        });
    };

    let record = SeedRecord::applied(&name, &fx_name);
    if let Err(e) = backend.mark_applied(&mut tx, schema, &record).await {
        error!("Cannot record seed '{name}' as applied: {e}");
        if let Err(rb) = backend.rollback(tx).await {
            warn!("Rollback failed: {rb}");
        }
        return Err(e.into());
    }

    backend.commit(tx).await.map_err(|source| {
        error!("Commit error: {source}");
        SeedError::Commit {
            seed: name.clone(),
            source,
        }
    })?;

    info!("Seed step executed: {fx_name}");
    Ok(SeedStatus::Applied)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::exec::{FnSeed, SeedFx, seed_fx};

    #[derive(Default)]
    struct State {
        databases: HashSet<String>,
        tables: HashSet<String>,
        records: Vec<SeedRecord>,
        journal: Vec<String>,
        next_tx: usize,
        fail_db_lookup: bool,
        fail_create_table: bool,
        fail_begin_at: Option<usize>,
        fail_commit_at: Option<usize>,
    }

    struct MemTx {
        id: usize,
        pending: Vec<SeedRecord>,
        state: Arc<Mutex<State>>,
    }

    impl MemTx {
        fn note(&self, event: &str) {
            self.state.lock().unwrap().journal.push(event.to_string());
        }
    }

    #[derive(Clone, Default)]
    struct MemoryBackend {
        state: Arc<Mutex<State>>,
    }

    impl MemoryBackend {
        fn with_database(name: &str) -> Self {
            let backend = Self::default();
            backend.state().databases.insert(name.to_string());
            backend
        }

        fn state(&self) -> std::sync::MutexGuard<'_, State> {
            self.state.lock().unwrap()
        }

        fn note(&self, event: impl Into<String>) {
            self.state().journal.push(event.into());
        }

        fn journal(&self) -> Vec<String> {
            self.state().journal.clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.journal()
                .iter()
                .filter(|e| e.starts_with(prefix))
                .count()
        }

        fn runs(&self) -> Vec<String> {
            self.journal()
                .into_iter()
                .filter_map(|e| e.strip_prefix("run ").map(str::to_string))
                .collect()
        }
    }

    fn fail(msg: &str) -> sqlx::Error {
        sqlx::Error::Protocol(msg.to_string())
    }

    #[async_trait]
    impl SeedBackend for MemoryBackend {
        type Tx = MemTx;

        async fn database_exists(&self, db_name: &str) -> Result<bool, sqlx::Error> {
            self.note("db_exists");
            let state = self.state();
            if state.fail_db_lookup {
                return Err(fail("catalog unavailable"));
            }
            Ok(state.databases.contains(db_name))
        }

        async fn create_database(&self, db_name: &str) -> Result<(), sqlx::Error> {
            self.note(format!("create_database {db_name}"));
            let mut state = self.state();
            // CREATE DATABASE folds the unquoted name; the catalog lookup does not.
            if !state.databases.insert(db_name.to_ascii_lowercase()) {
                return Err(fail("database already exists"));
            }
            Ok(())
        }

        async fn table_exists(&self, schema: &str, table: &str) -> Result<bool, sqlx::Error> {
            self.note("table_exists");
            Ok(self.state().tables.contains(&format!("{schema}.{table}")))
        }

        async fn begin(&self) -> Result<MemTx, sqlx::Error> {
            let mut state = self.state();
            state.next_tx += 1;
            let id = state.next_tx;
            if state.fail_begin_at == Some(id) {
                return Err(fail("too many connections"));
            }
            state.journal.push(format!("begin {id}"));
            Ok(MemTx {
                id,
                pending: Vec::new(),
                state: self.state.clone(),
            })
        }

        async fn commit(&self, tx: MemTx) -> Result<(), sqlx::Error> {
            let mut state = self.state();
            if state.fail_commit_at == Some(tx.id) {
                state.journal.push(format!("commit failed {}", tx.id));
                return Err(fail("connection reset"));
            }
            state.journal.push(format!("commit {}", tx.id));
            state.records.extend(tx.pending);
            Ok(())
        }

        async fn rollback(&self, tx: MemTx) -> Result<(), sqlx::Error> {
            self.note(format!("rollback {}", tx.id));
            Ok(())
        }

        async fn create_seed_table(
            &self,
            tx: &mut MemTx,
            schema: &str,
        ) -> Result<(), sqlx::Error> {
            tx.note("create_seed_table");
            let mut state = self.state();
            if state.fail_create_table {
                return Err(fail("permission denied for schema"));
            }
            state
                .tables
                .insert(format!("{}.{SEED_TABLE}", schema.to_ascii_lowercase()));
            Ok(())
        }

        async fn drop_seed_table(&self, schema: &str) -> Result<(), sqlx::Error> {
            let mut state = self.state();
            state.tables.remove(&format!("{schema}.{SEED_TABLE}"));
            state.records.clear();
            Ok(())
        }

        async fn is_applied(&self, _schema: &str, name: &str) -> Result<bool, sqlx::Error> {
            Ok(self
                .state()
                .records
                .iter()
                .any(|r| r.name.as_deref() == Some(name) && r.is_applied == Some(true)))
        }

        async fn mark_applied(
            &self,
            tx: &mut MemTx,
            _schema: &str,
            record: &SeedRecord,
        ) -> Result<(), sqlx::Error> {
            tx.pending.push(record.clone());
            Ok(())
        }

        async fn unmark(&self, _schema: &str, name: &str) -> Result<u64, sqlx::Error> {
            let mut state = self.state();
            let before = state.records.len();
            state
                .records
                .retain(|r| !(r.name.as_deref() == Some(name) && r.is_applied == Some(true)));
            Ok((before - state.records.len()) as u64)
        }

        async fn list(&self, _schema: &str) -> Result<Vec<SeedRecord>, sqlx::Error> {
            Ok(self.state().records.clone())
        }
    }

    fn ok_seed(name: &str) -> FnSeed<MemTx> {
        let label = name.to_string();
        FnSeed::<MemTx>::new(name)
            .with_fx_name(format!("seed_{name}"))
            .with_fx(move |tx| {
                let label = label.clone();
                Box::pin(async move {
                    tx.note(&format!("run {label}"));
                    Ok(())
                })
            })
    }

    fn failing_seed(name: &str, msg: &'static str) -> FnSeed<MemTx> {
        let label = name.to_string();
        FnSeed::<MemTx>::new(name)
            .with_fx_name(format!("seed_{name}"))
            .with_fx(move |tx| {
                let label = label.clone();
                Box::pin(async move {
                    tx.note(&format!("run {label}"));
                    anyhow::bail!(msg)
                })
            })
    }

    /// Executor that never hands its transaction back.
    struct DetachedSeed {
        fx: Option<SeedFx<MemTx>>,
        tx: Option<MemTx>,
    }

    impl SeedExec<MemTx> for DetachedSeed {
        fn name(&self) -> &str {
            "detached"
        }

        fn config(&mut self, fx: SeedFx<MemTx>) {
            self.fx = Some(fx);
        }

        fn get_seed(&self) -> Option<SeedFx<MemTx>> {
            self.fx.clone()
        }

        fn set_tx(&mut self, tx: MemTx) {
            self.tx = Some(tx);
        }

        fn get_tx(&mut self) -> Option<&mut MemTx> {
            self.tx.as_mut()
        }

        fn take_tx(&mut self) -> Option<MemTx> {
            None
        }
    }

    fn detached_seed(fail_with: Option<&'static str>) -> DetachedSeed {
        let mut seed = DetachedSeed { fx: None, tx: None };
        seed.config(seed_fx(move |tx: &mut MemTx| {
            Box::pin(async move {
                tx.note("run detached");
                match fail_with {
                    Some(msg) => anyhow::bail!(msg),
                    None => Ok(()),
                }
            })
        }));
        seed
    }

    fn seeder(backend: &MemoryBackend) -> Seeder<MemoryBackend> {
        Seeder::new(backend.clone(), "public", "kabestan").unwrap()
    }

    #[tokio::test]
    async fn test_empty_seed_list() {
        let backend = MemoryBackend::default();
        let mut seeder = seeder(&backend);
        assert!(seeder.is_empty());

        seeder.seed().await.unwrap();

        assert_eq!(
            backend.journal(),
            [
                "db_exists",
                "create_database kabestan",
                "table_exists",
                "begin 1",
                "create_seed_table",
                "commit 1",
            ]
        );
        assert!(backend.runs().is_empty());
    }

    #[tokio::test]
    async fn test_seeds_run_in_registration_order() {
        let backend = MemoryBackend::with_database("kabestan");
        let mut seeder = seeder(&backend);
        for name in ["roles", "users", "settings"] {
            seeder.add_seed(ok_seed(name));
        }
        assert_eq!(seeder.len(), 3);

        seeder.seed().await.unwrap();

        assert_eq!(backend.runs(), ["roles", "users", "settings"]);
        assert_eq!(backend.count("begin"), 4);
        assert_eq!(backend.count("commit "), 4);
        assert_eq!(backend.count("rollback"), 0);

        let journal = backend.journal();
        let tail: Vec<&str> = journal.iter().skip(5).map(String::as_str).collect();
        assert_eq!(
            tail,
            [
                "begin 2", "run roles", "commit 2", "begin 3", "run users", "commit 3", "begin 4",
                "run settings", "commit 4",
            ]
        );
    }

    #[tokio::test]
    async fn test_first_failure_aborts_run() {
        let backend = MemoryBackend::with_database("kabestan");
        let mut seeder = seeder(&backend);
        seeder.add_seed(ok_seed("roles"));
        seeder.add_seed(failing_seed("users", "bad column"));
        seeder.add_seed(ok_seed("settings"));

        let err = seeder.seed().await.unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("bad column"), "{msg}");
        assert!(msg.contains("seed_users"), "{msg}");
        assert!(matches!(err, SeedError::Step { ref seed, .. } if seed == "users"));

        assert_eq!(backend.runs(), ["roles", "users"]);
        let journal = backend.journal();
        assert!(journal.contains(&"commit 2".to_string()));
        assert!(journal.contains(&"rollback 3".to_string()));
        assert!(!journal.contains(&"commit 3".to_string()));
        assert!(!journal.contains(&"begin 4".to_string()));

        let applied = seeder.applied().await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name.as_deref(), Some("roles"));
        assert_eq!(applied[0].fx.as_deref(), Some("seed_roles"));
    }

    #[tokio::test]
    async fn test_pre_setup_is_idempotent() {
        let backend = MemoryBackend::default();
        let seeder = seeder(&backend);

        seeder.pre_setup().await.unwrap();
        seeder.pre_setup().await.unwrap();

        assert_eq!(backend.count("create_database"), 1);
        assert_eq!(backend.count("create_seed_table"), 1);
        assert_eq!(backend.count("db_exists"), 2);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_treated_as_missing() {
        let backend = MemoryBackend::with_database("kabestan");
        backend.state().fail_db_lookup = true;
        let seeder = seeder(&backend);

        let err = seeder.pre_setup().await.unwrap_err();

        assert!(matches!(err, SeedError::CreateDatabase { ref name, .. } if name == "kabestan"));
        assert_eq!(backend.count("create_database"), 1);
    }

    #[tokio::test]
    async fn test_create_table_failure_rolls_back() {
        let backend = MemoryBackend::with_database("kabestan");
        backend.state().fail_create_table = true;
        let mut seeder = seeder(&backend);
        seeder.add_seed(ok_seed("roles"));

        let err = seeder.seed().await.unwrap_err();

        assert!(matches!(err, SeedError::CreateSeedTable { ref table, .. } if table == "public.seeds"));
        assert!(backend.journal().contains(&"rollback 1".to_string()));
        assert!(backend.runs().is_empty());
    }

    #[tokio::test]
    async fn test_begin_failure_is_an_error() {
        let backend = MemoryBackend::with_database("kabestan");
        backend.state().fail_begin_at = Some(3);
        let mut seeder = seeder(&backend);
        seeder.add_seed(ok_seed("roles"));
        seeder.add_seed(ok_seed("users"));

        let err = seeder.seed().await.unwrap_err();

        assert!(matches!(err, SeedError::Begin { ref seed, .. } if seed == "users"));
        assert_eq!(backend.runs(), ["roles"]);
    }

    #[tokio::test]
    async fn test_commit_failure_aborts_run() {
        let backend = MemoryBackend::with_database("kabestan");
        backend.state().fail_commit_at = Some(2);
        let mut seeder = seeder(&backend);
        seeder.add_seed(ok_seed("roles"));
        seeder.add_seed(ok_seed("users"));

        let err = seeder.seed().await.unwrap_err();

        assert!(matches!(err, SeedError::Commit { ref seed, .. } if seed == "roles"));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(backend.runs(), ["roles"]);
        assert!(seeder.applied().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_applied_seeds_are_skipped() {
        let backend = MemoryBackend::with_database("kabestan");
        let mut seeder = seeder(&backend);
        seeder.add_seed(ok_seed("roles"));
        seeder.add_seed(ok_seed("users"));

        seeder.seed().await.unwrap();
        seeder.seed().await.unwrap();

        assert_eq!(backend.runs(), ["roles", "users"]);
        assert_eq!(seeder.applied().await.unwrap().len(), 2);

        assert_eq!(seeder.unmark("users").await.unwrap(), 1);
        seeder.seed().await.unwrap();

        assert_eq!(backend.runs(), ["roles", "users", "users"]);
    }

    #[tokio::test]
    async fn test_unconfigured_seed() {
        let backend = MemoryBackend::with_database("kabestan");
        let mut seeder = seeder(&backend);
        seeder.add_seed(FnSeed::<MemTx>::new("empty"));

        let err = seeder.seed().await.unwrap_err();

        assert!(matches!(err, SeedError::NotConfigured { ref seed } if seed == "empty"));
        assert_eq!(backend.count("begin"), 1);
    }

    #[tokio::test]
    async fn test_drop_seed_table() {
        let backend = MemoryBackend::with_database("kabestan");
        let mut seeder = seeder(&backend);
        seeder.add_seed(ok_seed("roles"));
        seeder.seed().await.unwrap();

        seeder.drop_seed_table().await.unwrap();
        assert!(backend.state().tables.is_empty());

        seeder.seed().await.unwrap();
        assert_eq!(backend.runs(), ["roles", "roles"]);
        assert_eq!(backend.count("create_seed_table"), 2);
    }

    #[tokio::test]
    async fn test_work_error_wins_over_missing_transaction() {
        let backend = MemoryBackend::with_database("kabestan");
        let mut seeder = seeder(&backend);
        seeder.add_seed(detached_seed(Some("bad column")));

        let err = seeder.seed().await.unwrap_err();

        assert!(matches!(err, SeedError::Step { ref seed, .. } if seed == "detached"));
        assert!(err.to_string().contains("bad column"), "{err}");
        assert_eq!(backend.runs(), ["detached"]);
        assert!(seeder.applied().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_seed_without_transaction_is_reported() {
        let backend = MemoryBackend::with_database("kabestan");
        let mut seeder = seeder(&backend);
        seeder.add_seed(detached_seed(None));

        let err = seeder.seed().await.unwrap_err();

        assert!(matches!(err, SeedError::MissingTransaction { ref seed, .. } if seed == "detached"));
        assert!(seeder.applied().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_case_names_pre_setup_once() {
        let backend = MemoryBackend::default();
        let seeder = Seeder::new(backend.clone(), "MySchema", "KabEstan").unwrap();
        assert_eq!(seeder.schema(), "myschema");
        assert_eq!(seeder.db_name(), "kabestan");

        seeder.pre_setup().await.unwrap();
        seeder.pre_setup().await.unwrap();

        assert_eq!(backend.count("create_database"), 1);
        assert_eq!(backend.count("create_seed_table"), 1);
        assert!(backend.state().tables.contains("myschema.seeds"));
    }

    #[test]
    fn test_rejects_invalid_schema() {
        let err = Seeder::new(MemoryBackend::default(), "public; --", "kabestan").err();
        assert!(matches!(err, Some(SeedError::Config { .. })));
    }
}
