use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::async_task::Attempt;
use crate::BackoffPolicy;
use crate::ConsensusError;
use crate::Error;
use crate::Result;
use crate::SystemError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinReply {
    /// The target leader added this node as a voter
    Joined,
    /// The target is not the leader; dial the hinted address instead
    Moved(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// Transient, the join is retried
    #[error("join target unreachable: {0}")]
    Unreachable(String),
    /// The cluster refused this node, no retry
    #[error("join rejected: {0}")]
    Rejected(String),
}

/// Carries a join request to a running cluster member.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JoinTransport: Send + Sync + 'static {
    /// Asks the member at `target` to add `(id, address)` as a voter.
    async fn request_join(
        &self,
        target: &str,
        id: &str,
        address: &str,
    ) -> std::result::Result<JoinReply, JoinError>;
}

/// Dials `join_address` until this node is added, following redirects.
/// Transient failures back off per `policy`; a rejection is fatal.
pub(crate) async fn join_cluster(
    transport: Arc<dyn JoinTransport>,
    join_address: &str,
    id: &str,
    address: &str,
    policy: BackoffPolicy,
    cancel: &CancellationToken,
) -> Result<String> {
    let target = Arc::new(Mutex::new(join_address.to_string()));

    task_with_timeout_and_exponential_backoff(
        || {
            let transport = transport.clone();
            let target = target.clone();
            let id = id.to_string();
            let address = address.to_string();
            async move {
                let dial = target.lock().clone();
                match transport.request_join(&dial, &id, &address).await {
                    Ok(JoinReply::Joined) => {
                        info!("joined cluster through {}", dial);
                        Attempt::Done(dial)
                    }
                    Ok(JoinReply::Moved(leader)) => {
                        info!("join redirected from {} to {}", dial, leader);
                        *target.lock() = leader;
                        Attempt::Retry(ConsensusError::NotLeader.into())
                    }
                    Err(JoinError::Unreachable(reason)) => {
                        warn!("join through {} failed: {}", dial, reason);
                        Attempt::Retry(SystemError::NodeStartFailed(format!("join target {dial} unreachable: {reason}")).into())
                    }
                    Err(JoinError::Rejected(reason)) => {
                        Attempt::Abort(Error::Fatal(format!("join through {dial} rejected: {reason}")))
                    }
                }
            }
        },
        policy,
        cancel,
    )
    .await
}
