//! Prometheus metrics for the daemon.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, IntCounter, IntCounterVec, IntGauge, Registry, histogram_opts, opts,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref SCANS_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("tugd_scans_total", "Fleet scans completed")).unwrap();
    pub static ref UPDATES_DETECTED_TOTAL: IntCounter = IntCounter::with_opts(opts!(
        "tugd_updates_detected_total",
        "Update proposals detected by scans"
    ))
    .unwrap();
    pub static ref UPDATES_APPLIED_TOTAL: IntCounter = IntCounter::with_opts(opts!(
        "tugd_updates_applied_total",
        "Updates applied successfully"
    ))
    .unwrap();
    pub static ref UPDATES_FAILED_TOTAL: IntCounter = IntCounter::with_opts(opts!(
        "tugd_updates_failed_total",
        "Updates that exhausted retries or failed fatally"
    ))
    .unwrap();
    pub static ref ROLLBACKS_TOTAL: IntCounter = IntCounter::with_opts(opts!(
        "tugd_rollbacks_total",
        "Rollbacks performed after failed applies"
    ))
    .unwrap();
    pub static ref VERSION_CONFLICTS_TOTAL: IntCounter = IntCounter::with_opts(opts!(
        "tugd_version_conflicts_total",
        "Optimistic-lock conflicts observed"
    ))
    .unwrap();
    pub static ref JOBS_STARTED_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("tugd_jobs_started_total", "Background jobs started"),
        &["kind"]
    )
    .unwrap();
    pub static ref PENDING_UPDATES: IntGauge = IntGauge::with_opts(opts!(
        "tugd_pending_updates",
        "Unresolved update rows"
    ))
    .unwrap();
    pub static ref SWEEP_DURATION_SECONDS: Histogram = Histogram::with_opts(histogram_opts!(
        "tugd_sweep_duration_seconds",
        "Orchestration sweep duration"
    ))
    .unwrap();
}

/// Register all metrics with the daemon registry. Safe to call once.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(SCANS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPDATES_DETECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPDATES_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPDATES_FAILED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ROLLBACKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VERSION_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(JOBS_STARTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PENDING_UPDATES.clone()))?;
    REGISTRY.register(Box::new(SWEEP_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Encode the registry in Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
