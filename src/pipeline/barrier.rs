//! Per-caller write barrier.
//!
//! A caller's write registers a ticket before it is queued. The ticket is
//! completed right before the caller receives its reply, and a read from the
//! same caller waits for the newest outstanding ticket first.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::trace;

/// Identity used to pair a caller's reads with its own writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(String);

impl CallerId {
    /// Fresh random identity.
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CallerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Inflight {
    seq: u64,
    done: watch::Receiver<bool>,
}

#[derive(Default)]
pub struct WriteBarrier {
    inflight: DashMap<CallerId, Inflight>,
    seq: AtomicU64,
}

impl fmt::Debug for WriteBarrier {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WriteBarrier")
            .field("inflight", &self.inflight.len())
            .finish()
    }
}

impl WriteBarrier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a write by `caller`, superseding any older ticket.
    pub fn begin(
        self: &Arc<Self>,
        caller: &CallerId,
    ) -> BarrierTicket {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = watch::channel(false);
        self.inflight.insert(caller.clone(), Inflight { seq, done: rx });
        BarrierTicket {
            barrier: self.clone(),
            caller: caller.clone(),
            seq,
            tx: Some(tx),
        }
    }

    /// Resolves once `caller` has no write in flight.
    pub async fn wait(
        &self,
        caller: &CallerId,
    ) {
        let mut done = match self.inflight.get(caller) {
            Some(entry) => entry.done.clone(),
            None => return,
        };
        trace!("caller {} waits for its write", caller);
        // A dropped sender also means the write is settled
        let _ = done.wait_for(|d| *d).await;
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    fn finish(
        &self,
        caller: &CallerId,
        seq: u64,
    ) {
        self.inflight.remove_if(caller, |_, inflight| inflight.seq == seq);
    }
}

/// Outstanding write of one caller. Completing or dropping it releases
/// readers waiting on that caller.
pub struct BarrierTicket {
    barrier: Arc<WriteBarrier>,
    caller: CallerId,
    seq: u64,
    tx: Option<watch::Sender<bool>>,
}

impl fmt::Debug for BarrierTicket {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("BarrierTicket")
            .field("caller", &self.caller)
            .field("seq", &self.seq)
            .finish()
    }
}

impl BarrierTicket {
    pub fn complete(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.barrier.finish(&self.caller, self.seq);
            tx.send_replace(true);
        }
    }
}

impl Drop for BarrierTicket {
    fn drop(&mut self) {
        self.release();
    }
}
