//! Bounded fan-out of async tasks.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{FtlError, Result};

/// Run `task` once per item with at most `capacity` running at a time.
///
/// Every task runs to completion; a failure never cancels its siblings.
/// Results come back in item order.
pub async fn run_bounded<I, F, Fut, T>(items: I, capacity: usize, task: F) -> Vec<Result<T>>
where
    I: IntoIterator,
    F: Fn(I::Item) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let permits = Arc::new(Semaphore::new(capacity.max(1)));

    let handles: Vec<_> = items
        .into_iter()
        .map(|item| {
            let permits = permits.clone();
            let work = task(item);
            tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| FtlError::Task(e.to_string()))?;
                work.await
            })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap_or_else(|e| Err(FtlError::Task(e.to_string()))))
        .collect()
}
