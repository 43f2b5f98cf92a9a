use crate::util::TEST_WAIT;
use std::{
    future::Future,
    time::{Duration, Instant},
};

/// Calls the async function repeatedly until it returns `Ok(Some(_))`.
///
/// * Pauses 50ms between tries.
/// * Will retry for up to [`TEST_WAIT`] before panicking.
///
/// Useful for observing asynchronous releases, e.g. a dropped guard.
pub async fn until_some<F, O, T>(f: F) -> T
where
    F: Fn() -> O,
    O: Future<Output = anyhow::Result<Option<T>>>,
{
    let start = Instant::now();
    loop {
        match f().await {
            Ok(Some(out)) => return out,
            Ok(None) => assert!(start.elapsed() < TEST_WAIT, "still unavailable"),
            Err(err) => assert!(start.elapsed() < TEST_WAIT, "{err}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await
    }
}
