use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::ConsensusError;
use crate::Error;
use crate::Result;

/// Outcome of one attempt of a retried task.
pub(crate) enum Attempt<T> {
    Done(T),
    /// Transient failure, try again after the backoff delay
    Retry(Error),
    /// Give up immediately
    Abort(Error),
}

/// Runs `task` until it succeeds or aborts, doubling the delay between
/// attempts up to `policy.max_delay_ms`. `policy.max_retries == 0` retries
/// forever; cancellation stops the loop with a shutdown error.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, Fut, T>(
    mut task: F,
    policy: BackoffPolicy,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut retries = 0usize;
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let timeout_duration = Duration::from_millis(policy.timeout_ms);

    loop {
        let last_error = match timeout(timeout_duration, task()).await {
            Ok(Attempt::Done(r)) => return Ok(r),
            Ok(Attempt::Abort(e)) => return Err(e),
            Ok(Attempt::Retry(e)) => {
                warn!("attempt {} failed with error: {:?}", retries + 1, &e);
                e
            }
            Err(elapsed) => {
                warn!("attempt {} timeout: {:?}", retries + 1, elapsed);
                ConsensusError::Timeout.into()
            }
        };

        retries += 1;
        if policy.max_retries != 0 && retries >= policy.max_retries {
            warn!("Task failed after {} retries", retries);
            return Err(last_error);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ConsensusError::Shutdown.into()),
            _ = sleep(delay) => {}
        }
        delay = (delay * 2).min(max_delay);
    }
}

/// Spawns a named background task, logging its failure.
pub(crate) fn spawn_task<Fut>(
    name: &str,
    fut: Fut,
) -> JoinHandle<()>
where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    })
}
