use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::envelope::decode_batch;
use crate::test_utils::kv_table;
use crate::test_utils::KvData;
use crate::ApplyResponse;
use crate::BatchApplier;
use crate::CommandOutcome;
use crate::ConsensusError;
use crate::MockConsensus;
use crate::MockLeaderResolver;
use crate::PipelineConfig;
use crate::WritePipeline;

fn ticker_with(consensus: MockConsensus) -> (Ticker<KvData>, Arc<Machine<KvData>>, CancellationToken) {
    let consensus: Arc<dyn Consensus> = Arc::new(consensus);
    let machine = Arc::new(Machine::new(KvData::default(), kv_table()).unwrap());
    let cfg = PipelineConfig::default();
    let (pipeline, rx) = WritePipeline::new(&cfg);

    let mut resolver = MockLeaderResolver::new();
    resolver.expect_leader_hint().returning(|| None);
    let applier = BatchApplier::new(
        rx,
        consensus.clone(),
        Arc::new(resolver),
        &cfg,
        CancellationToken::new(),
    );
    let shutdown = CancellationToken::new();
    tokio::spawn(applier.run(shutdown.clone()));

    let ticker = Ticker::new(machine.clone(), consensus, pipeline, Duration::from_millis(5));
    (ticker, machine, shutdown)
}

#[tokio::test]
async fn test_committed_tick_sets_read_barrier() {
    let mut consensus = MockConsensus::new();
    consensus.expect_state().returning(|| NodeRole::Leader);
    consensus.expect_apply().times(1).returning(|payload, _| {
        let batch = decode_batch(&payload).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(&batch[0][0][..], b"tick");
        assert_eq!(batch[0].len(), 3);
        Ok(ApplyResponse {
            index: 5,
            term: 2,
            outcomes: vec![CommandOutcome {
                result: Ok(Value::log_position(5, 2)),
                elapsed: Duration::ZERO,
            }],
        })
    });

    let (ticker, machine, shutdown) = ticker_with(consensus);
    assert!(ticker.tick_once().await);
    assert_eq!(machine.ticked(), (5, 2));
    shutdown.cancel();
}

#[tokio::test]
async fn test_failed_tick_clears_read_barrier() {
    let mut consensus = MockConsensus::new();
    consensus.expect_state().returning(|| NodeRole::Leader);
    consensus
        .expect_apply()
        .returning(|_, _| Err(ConsensusError::LeadershipLost.into()));

    let (ticker, machine, shutdown) = ticker_with(consensus);
    machine.record_tick(3, 1);
    assert!(!ticker.tick_once().await);
    assert_eq!(machine.ticked(), (0, 0));
    shutdown.cancel();
}

#[tokio::test]
async fn test_follower_does_not_tick() {
    let mut consensus = MockConsensus::new();
    consensus.expect_state().returning(|| NodeRole::Follower);
    consensus.expect_apply().never();

    let (ticker, machine, shutdown) = ticker_with(consensus);
    machine.record_tick(3, 1);
    assert!(!ticker.tick_once().await);
    assert_eq!(machine.ticked(), (0, 0));
    shutdown.cancel();
}
