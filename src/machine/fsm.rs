use std::io::Read;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::info;

use super::Machine;
use crate::snapshot::read_snapshot;
use crate::snapshot::write_snapshot;
use crate::snapshot::SnapshotCodec;
use crate::snapshot::SnapshotGuard;
use crate::snapshot::SnapshotHeader;
use crate::CommandOutcome;
use crate::FsmSnapshot;
use crate::LogRecord;
use crate::LogType;
use crate::Result;
use crate::StateMachine;

/// Adapts a [`Machine`] and its snapshot codec to the [`StateMachine`]
/// contract of the consensus layer.
pub struct ReplicatedFsm<D> {
    machine: Arc<Machine<D>>,
    codec: Arc<dyn SnapshotCodec<D>>,
    snapshot_in_flight: Arc<AtomicBool>,
}

impl<D> ReplicatedFsm<D>
where
    D: Send + Sync + 'static,
{
    pub fn new(
        machine: Arc<Machine<D>>,
        codec: Arc<dyn SnapshotCodec<D>>,
    ) -> Self {
        Self {
            machine,
            codec,
            snapshot_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn machine(&self) -> &Arc<Machine<D>> {
        &self.machine
    }
}

/// Header and encoded payload captured under the read lock. Holds the
/// single-in-flight guard until persisted or dropped.
struct MachineSnapshot {
    header: SnapshotHeader,
    payload: Vec<u8>,
    _guard: SnapshotGuard,
}

impl FsmSnapshot for MachineSnapshot {
    fn persist(
        self: Box<Self>,
        sink: &mut dyn Write,
    ) -> Result<()> {
        write_snapshot(&self.header, &self.payload, sink)
    }
}

impl<D> StateMachine for ReplicatedFsm<D>
where
    D: Send + Sync + 'static,
{
    fn apply(
        &self,
        record: &LogRecord,
    ) -> Result<Vec<CommandOutcome>> {
        match record.log_type {
            LogType::Command => self.machine.apply_entry(record.index, record.term, &record.data),
            LogType::Noop | LogType::Barrier | LogType::Configuration => {
                self.machine.note_applied(record.index);
                Ok(Vec::new())
            }
        }
    }

    fn snapshot(&self) -> Result<Box<dyn FsmSnapshot>> {
        let guard = SnapshotGuard::acquire(&self.snapshot_in_flight)?;
        let (header, payload) = self.machine.read(|state| {
            let payload = self.codec.encode(&state.data)?;
            Ok::<_, crate::Error>((SnapshotHeader::from(state.clock), payload))
        })?;
        Ok(Box::new(MachineSnapshot {
            header,
            payload,
            _guard: guard,
        }))
    }

    fn restore(
        &self,
        index: u64,
        source: &mut dyn Read,
    ) -> Result<()> {
        let (header, mut payload) = read_snapshot(source)?;
        let data = self.codec.decode(&mut payload)?;
        self.machine.install(header.into(), data, index);
        info!("restored snapshot at index {}: {:?}", index, header);
        Ok(())
    }

    fn applied_index(&self) -> u64 {
        self.machine.applied_index()
    }
}
