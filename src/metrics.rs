use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::time::Instant;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Job lifecycle metrics
    pub static ref JOBS_ENQUEUED: IntCounter = IntCounter::new(
        "annotation_jobs_enqueued_total",
        "Total number of annotation jobs enqueued"
    ).unwrap();

    pub static ref JOBS_COMPLETED: IntCounter = IntCounter::new(
        "annotation_jobs_completed_total",
        "Total number of annotation jobs finished successfully"
    ).unwrap();

    pub static ref JOBS_FAILED: IntCounter = IntCounter::new(
        "annotation_jobs_failed_total",
        "Total number of annotation jobs that ended in failure"
    ).unwrap();

    pub static ref JOBS_CANCELED: IntCounter = IntCounter::new(
        "annotation_jobs_canceled_total",
        "Total number of annotation jobs canceled by request"
    ).unwrap();

    pub static ref JOBS_RUNNING: IntGauge = IntGauge::new(
        "annotation_jobs_running",
        "Current number of started annotation jobs"
    ).unwrap();

    // Pipeline metrics
    pub static ref FRAMES_PROCESSED: IntCounter = IntCounter::new(
        "annotation_frames_processed_total",
        "Total number of frames pushed through detection"
    ).unwrap();

    pub static ref INFERENCE_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "annotation_inference_duration_seconds",
            "Single-image detection latency in seconds"
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(JOBS_ENQUEUED.clone())).unwrap();
    REGISTRY.register(Box::new(JOBS_COMPLETED.clone())).unwrap();
    REGISTRY.register(Box::new(JOBS_FAILED.clone())).unwrap();
    REGISTRY.register(Box::new(JOBS_CANCELED.clone())).unwrap();
    REGISTRY.register(Box::new(JOBS_RUNNING.clone())).unwrap();
    REGISTRY.register(Box::new(FRAMES_PROCESSED.clone())).unwrap();
    REGISTRY.register(Box::new(INFERENCE_LATENCY.clone())).unwrap();

    tracing::info!(
        "Metrics registry initialized with {} collectors",
        REGISTRY.gather().len()
    );
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration_seconds(&self, histogram: &Histogram) {
        let duration = self.start.elapsed();
        histogram.observe(duration.as_secs_f64());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
