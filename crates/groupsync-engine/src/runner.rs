//! Shared run plumbing: bounded collaborator calls and per-group fan-out.

use futures_util::{future, stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use groupsync_directory::error::{GroupSyncError, GroupSyncResult};
use groupsync_directory::traits::DirectoryQuery;

use crate::result::GroupOutcome;

/// Run a collaborator call, converting expiry into `GroupSyncError::Timeout`.
pub(crate) async fn bounded<T, F>(operation: &str, timeout: Duration, fut: F) -> GroupSyncResult<T>
where
    F: Future<Output = GroupSyncResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(GroupSyncError::timeout(operation, timeout)),
    }
}

/// Verify the directory answers before any mutation.
///
/// Every failure, including a timeout, is reported as unreachable.
pub(crate) async fn ensure_reachable(
    directory: &dyn DirectoryQuery,
    timeout: Duration,
) -> GroupSyncResult<()> {
    match bounded("test connection", timeout, directory.test_connection()).await {
        Ok(()) => Ok(()),
        Err(e @ GroupSyncError::DirectoryUnreachable { .. }) => Err(e),
        Err(e) => Err(GroupSyncError::unreachable_with_source(
            format!("{} did not answer", directory.url()),
            e,
        )),
    }
}

/// Process items with at most `concurrency` in flight.
///
/// Once `cancel` fires no further item is started; items already running
/// finish. Returns the outcomes and whether any item was left unstarted.
pub(crate) async fn fan_out<T, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    cancel: &CancellationToken,
    process: F,
) -> (Vec<GroupOutcome>, bool)
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = GroupOutcome>,
{
    let total = items.len();
    let outcomes: Vec<GroupOutcome> = stream::iter(items)
        .take_while(|_| future::ready(!cancel.is_cancelled()))
        .map(process)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    let stopped_early = outcomes.len() < total;
    (outcomes, stopped_early)
}
