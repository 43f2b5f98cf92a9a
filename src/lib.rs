//! Client for distributed mutual exclusion using postgres advisory locks & the tokio runtime.
//!
//! Locks are keyed by name and scoped to a database session, so
//! independent processes sharing a database exclude each other with no
//! extra infrastructure. Nested acquisitions within one async call chain
//! transparently reuse that chain's connection, making same-name
//! reentrancy safe (no self-deadlock) without threading a connection
//! handle through business logic.
//!
//! # Example
//! ```
//! # async fn foo() -> anyhow::Result<()> {
//! let client = advisory_mutex::Client::builder()
//!     .connection_string("postgres://postgres@localhost:5432/postgres")
//!     .build_and_check()
//!     .await?;
//!
//! // run exclusively; waits for any other holder of "important-job-123"
//! client
//!     .with_lock("important-job-123", || async {
//!         // only one session runs this at a time
//!         Ok(())
//!     })
//!     .await?;
//!
//! // non-blocking attempt: `None` when held elsewhere
//! let mutex = client.create_mutex("important-job-123");
//! let ran = mutex.try_with_lock(|| async { Ok(2 + 2) }).await?;
//! assert_eq!(ran, Some(4));
//! # Ok(()) }
//! ```

mod builder;
mod client;
mod conn;
mod key;
mod mutex;

pub use builder::ClientBuilder;
pub use client::Client;
pub use key::derive_key;
pub use mutex::{Mutex, MutexGuard};
