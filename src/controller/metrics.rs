//! Prometheus metrics for the load balancer controller
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `glbc_sync_duration_seconds` (histogram): duration of each sync/GC step labeled by pool.
//! - `glbc_sync_errors_total` (counter): failed sync/GC steps labeled by pool and error kind.
//! - `glbc_load_balancers` (gauge): L7 load balancers known to the controller labeled by stage.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::pools::{L7Record, L7Stage};

/// Labels for per-pool sync metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PoolLabels {
    /// Pool step, e.g. "backends", "backends_gc"
    pub pool: String,
}

/// Labels for sync error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub pool: String,
    /// Error kind, e.g. "cloud", "dependency", "kube"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StageLabels {
    pub stage: String,
}

/// Histogram tracking sync step duration (seconds)
pub static SYNC_DURATION_SECONDS: Lazy<Family<PoolLabels, Histogram>> = Lazy::new(|| {
    fn sync_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets; cloud calls dominate.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(sync_histogram)
});

/// Counter tracking failed sync steps
pub static SYNC_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Gauge tracking load balancers per pipeline stage
pub static LOAD_BALANCERS: Lazy<Family<StageLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "glbc_sync_duration_seconds",
        "Duration of pool sync and GC steps in seconds",
        SYNC_DURATION_SECONDS.clone(),
    );
    // Counters get the `_total` suffix from the encoder.
    registry.register(
        "glbc_sync_errors",
        "Total number of failed pool sync and GC steps",
        SYNC_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "glbc_load_balancers",
        "Number of L7 load balancers by pipeline stage",
        LOAD_BALANCERS.clone(),
    );

    registry
});

const STAGES: [L7Stage; 7] = [
    L7Stage::Absent,
    L7Stage::BackendsReady,
    L7Stage::UrlMapReady,
    L7Stage::ProxyReady,
    L7Stage::Ready,
    L7Stage::ForwardingRuleGone,
    L7Stage::ProxyGone,
];

/// Observe a sync step duration in seconds.
pub fn observe_sync_duration_seconds(pool: &str, seconds: f64) {
    let labels = PoolLabels {
        pool: pool.to_string(),
    };
    SYNC_DURATION_SECONDS.get_or_create(&labels).observe(seconds);
}

/// Increment the sync error counter.
pub fn inc_sync_error(pool: &str, kind: &str) {
    let labels = ErrorLabels {
        pool: pool.to_string(),
        kind: kind.to_string(),
    };
    SYNC_ERRORS_TOTAL.get_or_create(&labels).inc();
}

/// Publish how many load balancers sit in each stage.
pub fn set_load_balancers(records: &[L7Record]) {
    for stage in STAGES {
        let count = records.iter().filter(|r| r.stage == stage).count();
        let labels = StageLabels {
            stage: stage.to_string(),
        };
        LOAD_BALANCERS.get_or_create(&labels).set(count as i64);
    }
}
