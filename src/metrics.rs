//! Prometheus metrics, registered once via `LazyLock` and scraped through
//! the `/metrics` endpoint `controller.rs` exposes — the same pattern the
//! teacher's `commands/reconcile.rs` and `commands/watch.rs` use.

use std::sync::LazyLock;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static RECONCILE_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("sandbox_controller_reconcile_total", "Reconcile attempts by resource kind and outcome"),
        &["kind", "outcome"],
    )
    .expect("metric options are valid");
    REGISTRY.register(Box::new(counter.clone())).expect("metric not already registered");
    counter
});

pub static RECONCILE_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new("sandbox_controller_reconcile_duration_seconds", "Reconcile latency by resource kind"),
        &["kind"],
    )
    .expect("metric options are valid");
    REGISTRY.register(Box::new(histogram.clone())).expect("metric not already registered");
    histogram
});

pub static WARM_POOL_AVAILABLE_PODS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("sandbox_controller_warm_pool_available_pods", "Ready warm pods per pool"),
        &["pool"],
    )
    .expect("metric options are valid");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric not already registered");
    gauge
});

pub static WARM_POOL_ASSIGNED_PODS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("sandbox_controller_warm_pool_assigned_pods", "Assigned warm pods per pool"),
        &["pool"],
    )
    .expect("metric options are valid");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric not already registered");
    gauge
});

pub static ALLOCATION_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("sandbox_controller_allocation_total", "Warm pod allocations by outcome"),
        &["outcome"],
    )
    .expect("metric options are valid");
    REGISTRY.register(Box::new(counter.clone())).expect("metric not already registered");
    counter
});

pub static RECYCLE_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("sandbox_controller_recycle_total", "Warm pod recycle decisions by outcome"),
        &["outcome"],
    )
    .expect("metric options are valid");
    REGISTRY.register(Box::new(counter.clone())).expect("metric not already registered");
    counter
});

pub static LEADER_STATUS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(Opts::new("sandbox_controller_leader_status", "1 if this process holds the leader lease"), &["identity"])
        .expect("metric options are valid");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric not already registered");
    gauge
});

/// Forces registration of every metric family. Called once at startup so
/// `/metrics` isn't empty before the first reconcile fires.
pub fn init() {
    LazyLock::force(&RECONCILE_TOTAL);
    LazyLock::force(&RECONCILE_DURATION_SECONDS);
    LazyLock::force(&WARM_POOL_AVAILABLE_PODS);
    LazyLock::force(&WARM_POOL_ASSIGNED_PODS);
    LazyLock::force(&ALLOCATION_TOTAL);
    LazyLock::force(&RECYCLE_TOTAL);
    LazyLock::force(&LEADER_STATUS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_metrics_gather_after_init() {
        init();
        RECONCILE_TOTAL.with_label_values(&["Sandbox", "success"]).inc();
        let families = REGISTRY.gather();
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new().encode(&families, &mut buffer).unwrap();
        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("sandbox_controller_reconcile_total"));
    }
}
