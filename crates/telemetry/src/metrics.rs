use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Alert Registry Metrics ====
    pub static ref ALERTS_RAISED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("alerts_raised_total", "Total number of alert raises"),
            &["category", "outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ALERTS_EXPIRED: IntCounter = {
        let metric = IntCounter::new(
            "alerts_expired_total",
            "Total number of alerts purged after their TTL",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ALERTS_DRAINED: IntCounter = {
        let metric = IntCounter::new(
            "alerts_drained_total",
            "Total number of alerts handed to polling clients",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref NOTIFICATIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("notifications_total", "Total number of notification dispatches"),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Analyzer Metrics ====
    pub static ref ANALYZER_ACTIVE_SESSIONS: IntGauge = {
        let metric = IntGauge::new(
            "analyzer_active_sessions",
            "Number of analyzer sessions currently running",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANALYZER_FRAMES_PROCESSED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "analyzer_frames_processed_total",
                "Total number of frames processed",
            ),
            &["analyzer"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANALYZER_CROWDING_LEVEL: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "analyzer_crowding_level_total",
                "Frames classified at each crowding level",
            ),
            &["level"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANALYZER_TREND_HALTS: IntCounter = {
        let metric = IntCounter::new(
            "analyzer_trend_halts_total",
            "Sessions stopped by the linear growth safeguard",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}
