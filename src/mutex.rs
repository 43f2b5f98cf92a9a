use crate::conn::{ConnectionCoordinator, PooledConn};
use anyhow::Context;
use std::{fmt, future::Future, pin::Pin, sync::Arc};
use tracing::instrument;

const ACQUIRE: &str = "SELECT pg_advisory_lock($1)";
const TRY_ACQUIRE: &str = "SELECT pg_try_advisory_lock($1) AS acquired";
const RELEASE: &str = "SELECT pg_advisory_unlock($1)";

/// A distributed mutex for one named resource.
///
/// Contention is enforced by the database, not by this object's identity:
/// any two `Mutex` instances built from the same name, in any process
/// connected to the same database, exclude each other.
///
/// All operations are reentrant within a call chain: a nested acquisition
/// of the same key reuses the chain's connection, which the database
/// treats as the owning session re-acquiring its own lock, so it never
/// self-deadlocks.
#[derive(Clone)]
pub struct Mutex {
    pub(crate) coordinator: ConnectionCoordinator,
    name: Arc<String>,
    key: i64,
}

impl Mutex {
    pub(crate) fn new(coordinator: ConnectionCoordinator, name: String) -> Self {
        let key = crate::key::derive_key(&name);
        Self {
            coordinator,
            name: Arc::new(name),
            key,
        }
    }

    /// The resource name this mutex was built from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The advisory lock key derived from the name.
    pub fn key(&self) -> i64 {
        self.key
    }

    /// Runs `work` while holding the lock.
    ///
    /// Waits on the database's native lock queue until the lock is
    /// granted, runs `work`, then releases the lock before returning
    /// `work`'s output, also when `work` fails.
    #[instrument(skip_all, fields(key = self.key))]
    pub async fn with_lock<T, F, Fut>(&self, work: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let key = self.key;
        self.coordinator
            .with_connection(|conn| async move {
                conn.execute(ACQUIRE, &[&key])
                    .await
                    .context("failed to acquire advisory lock")?;

                let result = work().await;

                if let Err(err) = conn.execute(RELEASE, &[&key]).await {
                    match result {
                        // work failed first, its error wins
                        Err(work_err) => {
                            tracing::warn!(key, "failed to release advisory lock: {err}");
                            return Err(work_err);
                        }
                        Ok(_) => {
                            return Err(err).context("failed to release advisory lock")
                        }
                    }
                }
                result
            })
            .await
    }

    /// Runs `work` while holding the lock, if it is free.
    ///
    /// Returns `Ok(None)` without running `work` when the lock is held
    /// elsewhere. When granted, the lock is released after `work`
    /// completes, also when `work` fails.
    ///
    /// Nested inside [`Mutex::with_lock`] for the same key this always
    /// acquires, since the chain's session already owns the lock.
    #[instrument(skip_all, fields(key = self.key))]
    pub async fn try_with_lock<T, F, Fut>(&self, work: F) -> anyhow::Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let key = self.key;
        self.coordinator
            .with_connection(|conn| async move {
                let row = conn
                    .query_one(TRY_ACQUIRE, &[&key])
                    .await
                    .context("failed to attempt advisory lock")?;
                if !row.try_get::<_, bool>("acquired")? {
                    return Ok(None);
                }

                let result = work().await;

                if let Err(err) = conn.execute(RELEASE, &[&key]).await {
                    match result {
                        Err(work_err) => {
                            tracing::warn!(key, "failed to release advisory lock: {err}");
                            return Err(work_err);
                        }
                        Ok(_) => {
                            return Err(err).context("failed to release advisory lock")
                        }
                    }
                }
                result.map(Some)
            })
            .await
    }

    /// Tries to acquire the lock, handing back a guard to release later.
    ///
    /// Returns `Ok(None)` when the lock is held elsewhere. The guard
    /// releases the lock when dropped, or explicitly via
    /// [`MutexGuard::release`].
    ///
    /// Only correct for the outermost acquisition of a key per call
    /// chain: nested inside an operation already holding this key, the
    /// attempt reuses the chain's connection and reports an acquisition
    /// the guard cannot meaningfully own. Prefer
    /// [`Mutex::try_with_lock`], which brackets release correctly in
    /// every position.
    #[deprecated(note = "unsafe under nested reentrant use; prefer `try_with_lock`")]
    #[instrument(skip_all, fields(key = self.key))]
    pub async fn try_lock(&self) -> anyhow::Result<Option<MutexGuard>> {
        let conn = self.coordinator.get_connection().await?;

        let row = conn
            .query_one(TRY_ACQUIRE, &[&self.key])
            .await
            .context("failed to attempt advisory lock")?;
        if !row.try_get::<_, bool>("acquired")? {
            // conn drops here: back to the pool, or no-op if reused
            return Ok(None);
        }

        Ok(Some(MutexGuard {
            key: self.key,
            conn: Some(conn),
        }))
    }

    /// Wraps `work` so that every invocation runs inside
    /// [`Mutex::with_lock`].
    ///
    /// Pure composition, no locking semantics of its own:
    /// `wrap_with_lock(f)(args)` behaves exactly like
    /// `with_lock(|| f(args))`.
    pub fn wrap_with_lock<A, T, F, Fut>(
        &self,
        work: F,
    ) -> impl Fn(A) -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mutex = self.clone();
        move |args: A| {
            let mutex = mutex.clone();
            let work = work.clone();
            let locked: Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>> =
                Box::pin(async move { mutex.with_lock(move || work(args)).await });
            locked
        }
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.name)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Represents a held advisory lock.
///
/// On drop asynchronously releases the lock and returns its connection
/// to the pool.
pub struct MutexGuard {
    key: i64,
    conn: Option<PooledConn>,
}

impl MutexGuard {
    /// Releases the lock, then returns the connection to the pool.
    ///
    /// Unlike dropping the guard, this surfaces a failed release to the
    /// caller.
    pub async fn release(mut self) -> anyhow::Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.execute(RELEASE, &[&self.key])
                .await
                .context("failed to release advisory lock")?;
        }
        Ok(())
    }
}

impl Drop for MutexGuard {
    /// Asynchronously releases the lock.
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let key = self.key;
            tokio::spawn(async move {
                // unlock before the drop of `conn` hands it back to the
                // pool, so the next borrower never inherits the lock
                if let Err(err) = conn.execute(RELEASE, &[&key]).await {
                    tracing::warn!(key, "failed to release advisory lock: {err}");
                }
            });
        }
    }
}

impl fmt::Debug for MutexGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexGuard")
            .field("key", &self.key)
            .field("reused", &self.conn.as_ref().map(PooledConn::is_reused))
            .finish()
    }
}
