use crate::{conn::ConnectionCoordinator, ClientBuilder, Mutex, MutexGuard};
use anyhow::Context;
use std::{fmt, future::Future, pin::Pin};

/// Client for creating and using [`Mutex`]es.
///
/// Owns the connection pool the locks run on. Cloning is cheap and all
/// clones share the pool, so independently configured clients in one
/// process never interfere with each other.
#[derive(Clone)]
pub struct Client {
    pub(crate) coordinator: ConnectionCoordinator,
}

impl Client {
    /// Returns a new [`Client`] builder.
    pub fn builder() -> ClientBuilder {
        <_>::default()
    }

    /// Returns a new [`Client`] using an existing connection pool.
    ///
    /// Skips the connectivity check performed by
    /// [`ClientBuilder::build_and_check`].
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self {
            coordinator: ConnectionCoordinator::new(pool),
        }
    }

    /// Returns a [`Mutex`] for the given resource name.
    ///
    /// Any two mutexes built from the same name derive the same advisory
    /// lock key and exclude each other, also across processes.
    pub fn create_mutex(&self, name: impl Into<String>) -> Mutex {
        Mutex::new(self.coordinator.clone(), name.into())
    }

    /// Runs `work` while holding the named lock.
    ///
    /// See [`Mutex::with_lock`].
    pub async fn with_lock<T, F, Fut>(
        &self,
        name: impl Into<String>,
        work: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.create_mutex(name).with_lock(work).await
    }

    /// Runs `work` while holding the named lock, if it is free.
    ///
    /// See [`Mutex::try_with_lock`].
    pub async fn try_with_lock<T, F, Fut>(
        &self,
        name: impl Into<String>,
        work: F,
    ) -> anyhow::Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.create_mutex(name).try_with_lock(work).await
    }

    /// Tries to acquire the named lock, handing back a guard.
    ///
    /// See [`Mutex::try_lock`] for the reentrancy caveat.
    #[deprecated(note = "unsafe under nested reentrant use; prefer `try_with_lock`")]
    #[allow(deprecated)]
    pub async fn try_lock(&self, name: impl Into<String>) -> anyhow::Result<Option<MutexGuard>> {
        self.create_mutex(name).try_lock().await
    }

    /// Wraps `work` so every invocation runs while holding the named
    /// lock.
    ///
    /// See [`Mutex::wrap_with_lock`].
    pub fn wrap_with_lock<A, T, F, Fut>(
        &self,
        name: impl Into<String>,
        work: F,
    ) -> impl Fn(A) -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.create_mutex(name).wrap_with_lock(work)
    }

    /// Checks the database is reachable with one round trip.
    pub(crate) async fn check_connectivity(&self) -> anyhow::Result<()> {
        self.coordinator
            .with_connection(|conn| async move {
                conn.query_one("SELECT 1", &[])
                    .await
                    .context("connectivity check failed: is the database reachable?")?;
                Ok(())
            })
            .await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}
