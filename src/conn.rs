use anyhow::Context;
use deadpool_postgres::{Object, Pool};
use std::{future::Future, ops::Deref, sync::Arc};

tokio::task_local! {
    /// Connection bound to the current call chain, while one is in scope.
    static SCOPED_CONN: Arc<Object>;
}

/// Hands out pooled connections with call-chain reentrancy.
///
/// Advisory locks belong to the database *session*, so nested lock
/// operations within one logical call chain must run on the connection
/// that chain already holds. Giving a nested acquire of the same key its
/// own connection would block it forever behind the outer acquire.
///
/// The chain binding is a tokio task-local scoped over the outermost
/// operation's future. The boundary is exactly tokio's:
///
/// * everything awaited beneath the scoped future, including `join!` or
///   `select!` branches created inside it, continues the chain and reuses
///   its connection;
/// * `tokio::spawn` starts a new chain (task-locals do not cross spawn);
/// * sibling futures raced outside any scope each acquire their own
///   connection.
#[derive(Clone)]
pub(crate) struct ConnectionCoordinator {
    pool: Pool,
}

impl ConnectionCoordinator {
    pub(crate) fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Runs `work` on the call chain's connection.
    ///
    /// If the chain already has a connection in scope, `work` runs
    /// directly on it and the scope owner remains responsible for its
    /// release. Otherwise a connection is acquired from the pool, bound
    /// as the chain connection for the duration of `work`, and returned
    /// to the pool exactly once when `work` completes, whether it
    /// succeeds or fails.
    pub(crate) async fn with_connection<T, F, Fut>(&self, work: F) -> anyhow::Result<T>
    where
        F: FnOnce(Arc<Object>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Ok(conn) = SCOPED_CONN.try_with(Arc::clone) {
            return work(conn).await;
        }

        let conn = Arc::new(
            self.pool
                .get()
                .await
                .context("could not acquire db connection")?,
        );
        // The pool gets the connection back when the last clone drops,
        // after the scope closes.
        SCOPED_CONN.scope(Arc::clone(&conn), work(conn)).await
    }

    /// Checks out a connection whose lifetime the caller manages.
    ///
    /// Reuses the chain connection when one is in scope, otherwise
    /// acquires a fresh one from the pool. Dropping the returned
    /// [`PooledConn`] is the release: a no-op for a reused connection,
    /// a return to the pool for a fresh one. A fresh checkout does
    /// *not* establish a chain binding for nested callers.
    pub(crate) async fn get_connection(&self) -> anyhow::Result<PooledConn> {
        if let Ok(conn) = SCOPED_CONN.try_with(Arc::clone) {
            return Ok(PooledConn::Reused(conn));
        }
        let conn = self
            .pool
            .get()
            .await
            .context("could not acquire db connection")?;
        Ok(PooledConn::Fresh(conn))
    }
}

/// A checked out connection, released by dropping.
pub(crate) enum PooledConn {
    /// Owned checkout, returns to the pool on drop.
    Fresh(Object),
    /// Borrowed from the current call chain's scope, drop is a no-op
    /// on the underlying connection.
    Reused(Arc<Object>),
}

impl PooledConn {
    pub(crate) fn is_reused(&self) -> bool {
        matches!(self, Self::Reused(_))
    }
}

impl Deref for PooledConn {
    type Target = Object;

    fn deref(&self) -> &Object {
        match self {
            Self::Fresh(conn) => conn,
            Self::Reused(conn) => conn,
        }
    }
}
