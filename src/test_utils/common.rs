use std::path::Path;

use bytes::Bytes;

use crate::NodeConfig;
use crate::SledLogStore;
use crate::SledStableStore;
use crate::StorageConfig;
use crate::init_sled_log_db;
use crate::init_sled_stable_db;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// `["set", "k", "v"]` style argument vector.
pub fn args(parts: &[&str]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
}

pub fn open_log_store(dir: &Path) -> SledLogStore {
    let db = init_sled_log_db(dir, &StorageConfig::default()).unwrap();
    SledLogStore::new(db).unwrap()
}

pub fn open_stable_store(dir: &Path) -> SledStableStore {
    let db = init_sled_stable_db(dir, &StorageConfig::default()).unwrap();
    SledStableStore::new(db).unwrap()
}

/// Single-node configuration rooted at `dir` with fast background cadences.
pub fn node_config(dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.cluster.node_id = "n1".to_string();
    config.cluster.listen_address = "127.0.0.1:17001".to_string();
    config.cluster.data_dir = dir.join("data");
    config.cluster.log_dir = dir.join("logs");
    config.ticker.interval_ms = 10;
    config.reads.progress_poll_interval_ms = 5;
    config.topology.probe_interval_ms = 50;
    config.topology.probe_timeout_ms = 10;
    config.topology.membership_timeout_ms = 200;
    config.pipeline.max_batch_size = 64;
    config.pipeline.queue_capacity = 256;
    config
}
