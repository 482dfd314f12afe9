use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

use crate::utils::file_io::open_file_for_append;
use crate::Result;

/// Installs the global tracing subscriber writing to
/// `<log_dir>/<node_id>/node.log`. Keep the guard alive for the process
/// lifetime or buffered lines are lost.
pub fn init_observability(
    node_id: &str,
    log_dir: &Path,
) -> Result<WorkerGuard> {
    let log_file = open_file_for_append(log_dir.join(node_id).join("node.log"))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
