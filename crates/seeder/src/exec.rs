//! Seed executors.
//!
//! A seed step is any type implementing [`SeedExec`]. The seeder hands it a
//! fresh transaction, asks it for its work function and runs that function on
//! the attached transaction. [`FnSeed`] covers the common case of a named
//! closure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a seeding function.
pub type SeedFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// The unit of work of a seed: runs against the transaction it is given.
pub type SeedFx<T> = Arc<dyn for<'t> Fn(&'t mut T) -> SeedFuture<'t> + Send + Sync>;

/// Wraps a closure into a [`SeedFx`].
///
/// ```rust,ignore
/// let fx = seed_fx(|tx: &mut PgTx| {
///     Box::pin(async move {
///         sqlx::query("INSERT INTO roles (name) VALUES ('admin')")
///             .execute(&mut **tx)
///             .await?;
///         Ok(())
///     })
/// });
/// ```
pub fn seed_fx<T, F>(f: F) -> SeedFx<T>
where
    F: for<'t> Fn(&'t mut T) -> SeedFuture<'t> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Capability contract of a registered seed.
pub trait SeedExec<T>: Send {
    /// Seed name, recorded in the bookkeeping table.
    fn name(&self) -> &str;

    /// Name of the seeding function, used in logs and error messages.
    fn fx_name(&self) -> &str {
        self.name()
    }

    /// Configures the seeding function.
    fn config(&mut self, fx: SeedFx<T>);

    /// Returns the configured seeding function.
    fn get_seed(&self) -> Option<SeedFx<T>>;

    /// Attaches the transaction the next run will use.
    fn set_tx(&mut self, tx: T);

    /// Borrows the attached transaction.
    fn get_tx(&mut self) -> Option<&mut T>;

    /// Detaches the transaction so the seeder can commit or roll it back.
    fn take_tx(&mut self) -> Option<T>;
}

/// A named seed backed by a closure.
pub struct FnSeed<T> {
    name: String,
    fx_name: String,
    fx: Option<SeedFx<T>>,
    tx: Option<T>,
}

impl<T> FnSeed<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            fx_name: name.clone(),
            name,
            fx: None,
            tx: None,
        }
    }

    /// Sets the function name reported in logs, when it differs from the seed
    /// name.
    pub fn with_fx_name(mut self, fx_name: impl Into<String>) -> Self {
        self.fx_name = fx_name.into();
        self
    }

    pub fn with_fx<F>(mut self, f: F) -> Self
    where
        F: for<'t> Fn(&'t mut T) -> SeedFuture<'t> + Send + Sync + 'static,
    {
        self.fx = Some(seed_fx(f));
        self
    }
}

impl<T: Send> SeedExec<T> for FnSeed<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn fx_name(&self) -> &str {
        &self.fx_name
    }

    fn config(&mut self, fx: SeedFx<T>) {
        self.fx = Some(fx);
    }

    fn get_seed(&self) -> Option<SeedFx<T>> {
        self.fx.clone()
    }

    fn set_tx(&mut self, tx: T) {
        self.tx = Some(tx);
    }

    fn get_tx(&mut self) -> Option<&mut T> {
        self.tx.as_mut()
    }

    fn take_tx(&mut self) -> Option<T> {
        self.tx.take()
    }
}

/// A registered seed.
pub struct Seed<T> {
    pub executor: Box<dyn SeedExec<T>>,
}
