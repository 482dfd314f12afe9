//! Write Pipeline
//!
//! Callers push write requests into a bounded queue. A single applier task
//! drains it: one request blocking, then up to `max_batch_size` more without
//! waiting, encodes them as one batch envelope and issues exactly one
//! consensus Apply per cycle. Each caller gets its own outcome back on a
//! dedicated channel.

mod barrier;
pub mod envelope;

pub use barrier::*;

#[cfg(test)]
mod envelope_test;

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::metrics::APPLY_LATENCY_METRIC;
use crate::metrics::PIPELINE_ERRORS;
use crate::metrics::WRITE_BATCH_SIZE_METRIC;
use crate::CommandError;
use crate::CommandOutcome;
use crate::Consensus;
use crate::ConsensusError;
use crate::Error;
use crate::PipelineConfig;
use crate::Result;

/// Resolves the address a redirected caller should dial.
#[cfg_attr(test, automock)]
pub trait LeaderResolver: Send + Sync + 'static {
    /// Externally advertised address of the current leader, if known.
    fn leader_hint(&self) -> Option<String>;
}

/// Maps a consensus failure to what a caller sees.
///
/// Leadership-class failures become a redirect to the leader or, with no
/// leader known, a cluster-down signal. They are never returned raw.
pub fn translate_error(
    err: &Error,
    resolver: &dyn LeaderResolver,
) -> CommandError {
    match err {
        Error::Consensus(ConsensusError::Shutdown) => CommandError::ClusterDown,
        Error::Consensus(e) if e.is_leadership_class() => redirect(resolver),
        Error::Command(e) => translate_command_error(e, resolver),
        Error::Consensus(ConsensusError::Timeout) => CommandError::custom("timed out"),
        Error::Fatal(_) => CommandError::ClusterDown,
        other => CommandError::custom(other.to_string()),
    }
}

/// Rewrites an untranslated not-leader reply into a redirect.
pub fn translate_command_error(
    err: &CommandError,
    resolver: &dyn LeaderResolver,
) -> CommandError {
    if err.is_leadership_class() {
        redirect(resolver)
    } else {
        err.clone()
    }
}

fn redirect(resolver: &dyn LeaderResolver) -> CommandError {
    match resolver.leader_hint() {
        Some(addr) => CommandError::Moved(addr),
        None => CommandError::ClusterDown,
    }
}

fn error_class(err: &Error) -> &'static str {
    match err {
        Error::Consensus(e) if e.is_leadership_class() => "leadership",
        Error::Consensus(ConsensusError::Timeout) => "timeout",
        Error::Fatal(_) => "fatal",
        _ => "other",
    }
}

/// One queued write.
#[derive(Debug)]
pub struct WriteRequest {
    args: Vec<Bytes>,
    reply: oneshot::Sender<CommandOutcome>,
    ticket: Option<BarrierTicket>,
    enqueued_at: Instant,
}

impl WriteRequest {
    fn finish(
        self,
        outcome: CommandOutcome,
    ) {
        // Readers of this caller are released before the reply is visible
        if let Some(ticket) = self.ticket {
            ticket.complete();
        }
        if self.reply.send(outcome).is_err() {
            trace!("write caller went away before its reply");
        }
    }
}

/// Handle to a submitted write.
#[derive(Debug)]
pub struct PendingWrite {
    rx: oneshot::Receiver<CommandOutcome>,
}

impl PendingWrite {
    /// Waits for the batch holding this write to be applied.
    pub async fn wait(self) -> CommandOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => CommandOutcome {
                result: Err(CommandError::ClusterDown),
                elapsed: Duration::ZERO,
            },
        }
    }
}

/// Cloneable submission side of the pipeline.
#[derive(Clone, Debug)]
pub struct WritePipeline {
    tx: mpsc::Sender<WriteRequest>,
    barrier: Arc<WriteBarrier>,
}

impl WritePipeline {
    /// Creates the queue; the receiver goes to [`BatchApplier::new`].
    pub fn new(config: &PipelineConfig) -> (Self, mpsc::Receiver<WriteRequest>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        (
            Self {
                tx,
                barrier: WriteBarrier::new(),
            },
            rx,
        )
    }

    pub fn barrier(&self) -> &Arc<WriteBarrier> {
        &self.barrier
    }

    /// Queues `args` for the next batch. Waits while the queue is full.
    ///
    /// With a `caller`, the write is tracked by the per-caller barrier.
    pub async fn submit(
        &self,
        caller: Option<&CallerId>,
        args: Vec<Bytes>,
    ) -> std::result::Result<PendingWrite, CommandError> {
        let (reply, rx) = oneshot::channel();
        let request = WriteRequest {
            args,
            reply,
            ticket: caller.map(|c| self.barrier.begin(c)),
            enqueued_at: Instant::now(),
        };
        self.tx.send(request).await.map_err(|_| {
            warn!("write pipeline is closed");
            CommandError::ClusterDown
        })?;
        Ok(PendingWrite { rx })
    }

    /// Submits and waits for the outcome.
    pub async fn write(
        &self,
        caller: Option<&CallerId>,
        args: Vec<Bytes>,
    ) -> CommandOutcome {
        match self.submit(caller, args).await {
            Ok(pending) => pending.wait().await,
            Err(e) => CommandOutcome {
                result: Err(e),
                elapsed: Duration::ZERO,
            },
        }
    }
}

/// The single task allowed to call [`Consensus::apply`].
pub struct BatchApplier {
    rx: mpsc::Receiver<WriteRequest>,
    consensus: Arc<dyn Consensus>,
    resolver: Arc<dyn LeaderResolver>,
    max_batch_size: usize,
    apply_timeout: Option<Duration>,
    /// Cancelled when the state machine reports divergence
    fatal: CancellationToken,
}

impl BatchApplier {
    pub fn new(
        rx: mpsc::Receiver<WriteRequest>,
        consensus: Arc<dyn Consensus>,
        resolver: Arc<dyn LeaderResolver>,
        config: &PipelineConfig,
        fatal: CancellationToken,
    ) -> Self {
        Self {
            rx,
            consensus,
            resolver,
            max_batch_size: config.max_batch_size.max(1),
            apply_timeout: config.apply_timeout(),
            fatal,
        }
    }

    /// Drains the queue until `shutdown` fires or every sender is gone.
    /// Requests still queued at shutdown are answered with cluster-down.
    pub async fn run(
        mut self,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!("write pipeline applier started, max batch {}", self.max_batch_size);
        let mut batch = Vec::with_capacity(self.max_batch_size);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                first = self.rx.recv() => {
                    let Some(first) = first else { break };
                    batch.push(first);
                    while batch.len() < self.max_batch_size {
                        match self.rx.try_recv() {
                            Ok(req) => batch.push(req),
                            Err(_) => break,
                        }
                    }
                    self.apply_batch(std::mem::take(&mut batch)).await;
                }
            }
        }

        self.rx.close();
        while let Ok(req) = self.rx.try_recv() {
            req.finish(CommandOutcome {
                result: Err(CommandError::ClusterDown),
                elapsed: Duration::ZERO,
            });
        }
        info!("write pipeline applier stopped");
        Ok(())
    }

    /// One Apply for the whole batch, then one reply per request.
    pub(crate) async fn apply_batch(
        &self,
        batch: Vec<WriteRequest>,
    ) {
        WRITE_BATCH_SIZE_METRIC.observe(batch.len() as f64);
        let args: Vec<&[Bytes]> = batch.iter().map(|r| r.args.as_slice()).collect();
        let payload = match envelope::encode_batch(&args) {
            Ok(p) => p,
            Err(e) => {
                error!("batch of {} failed to encode: {}", batch.len(), e);
                let err = CommandError::custom(e.to_string());
                for req in batch {
                    req.finish(failed(err.clone()));
                }
                return;
            }
        };

        let started = Instant::now();
        let res = self.consensus.apply(payload, self.apply_timeout).await;
        APPLY_LATENCY_METRIC.observe(started.elapsed().as_secs_f64() * 1000.0);

        match res {
            Ok(response) if response.outcomes.len() == batch.len() => {
                debug!(
                    "applied batch of {} at index {} in {:?}",
                    batch.len(),
                    response.index,
                    started.elapsed()
                );
                for (req, mut outcome) in batch.into_iter().zip(response.outcomes) {
                    if let Err(e) = &outcome.result {
                        outcome.result = Err(translate_command_error(e, self.resolver.as_ref()));
                    }
                    trace!("write waited {:?} in total", req.enqueued_at.elapsed());
                    req.finish(outcome);
                }
            }
            Ok(response) => {
                error!(
                    "apply at {} returned {} outcomes for {} commands",
                    response.index,
                    response.outcomes.len(),
                    batch.len()
                );
                self.fatal.cancel();
                for req in batch {
                    req.finish(failed(CommandError::ClusterDown));
                }
            }
            Err(e) => {
                PIPELINE_ERRORS.with_label_values(&[error_class(&e)]).inc();
                if e.is_fatal() {
                    error!("state machine diverged, stopping node: {:?}", e);
                    self.fatal.cancel();
                } else {
                    debug!("apply of {} writes failed: {:?}", batch.len(), e);
                }
                let err = translate_error(&e, self.resolver.as_ref());
                for req in batch {
                    req.finish(failed(err.clone()));
                }
            }
        }
    }
}

fn failed(err: CommandError) -> CommandOutcome {
    CommandOutcome {
        result: Err(err),
        elapsed: Duration::ZERO,
    }
}
