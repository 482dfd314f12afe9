use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::Histogram;
use prometheus::HistogramOpts;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;


lazy_static! {
    pub static ref WRITE_BATCH_SIZE_METRIC: Histogram = Histogram::with_opts(
        HistogramOpts::new("write_batch_size", "Commands folded into one consensus entry")
            .buckets(exponential_buckets(1.0, 2.0, 11).expect("valid buckets"))
    )
    .expect("metric can not be created");

    pub static ref APPLY_LATENCY_METRIC: Histogram = Histogram::with_opts(
        HistogramOpts::new("apply_latency_ms", "Latency of one consensus Apply call in ms")
            .buckets(exponential_buckets(0.125, 2.0, 16).expect("valid buckets"))
    )
    .expect("metric can not be created");

    pub static ref PIPELINE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("pipeline_errors", "Failed Apply cycles by error class"),
        &["class"]
    )
    .expect("Should succeed to create metric");

    pub static ref REJECTED_READS: IntCounterVec = IntCounterVec::new(
        Opts::new("rejected_reads", "Reads refused by the consistency controller"),
        &["policy"]
    )
    .expect("Should succeed to create metric");

    pub static ref TICKS_COMMITTED: IntCounter =
        IntCounter::new("ticks_committed", "Ticks committed by this node as leader")
            .expect("Should succeed to create metric");

    pub static ref REGISTRY: Registry = Registry::new();
}

/// Registers every collector with `registry`. Already registered
/// collectors are skipped.
pub fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(WRITE_BATCH_SIZE_METRIC.clone()),
        Box::new(APPLY_LATENCY_METRIC.clone()),
        Box::new(PIPELINE_ERRORS.clone()),
        Box::new(REJECTED_READS.clone()),
        Box::new(TICKS_COMMITTED.clone()),
    ];
    for c in collectors {
        if let Err(e) = registry.register(c) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                warn!("collector can not be registered: {:?}", e);
            }
        }
    }
}

/// Prometheus text exposition of the default registry.
pub fn render() -> String {
    register_custom_metrics(&REGISTRY);
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
