//! Prometheus metrics for the workspace pool
//!
//! Features:
//! - Workspace lifecycle events (reuse, allocation, reclaim, waits)
//! - Idle workspace gauge
//! - Bytes pushed through the streaming drivers

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Once;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref WORKSPACE_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("zstd_wsm_workspace_events_total", "Workspace pool events"),
        &["event"]
    ).unwrap();

    pub static ref IDLE_WORKSPACES: IntGauge = IntGauge::new(
        "zstd_wsm_idle_workspaces",
        "Workspaces sitting idle in the pool"
    ).unwrap();

    pub static ref STREAM_BYTES: IntCounterVec = IntCounterVec::new(
        Opts::new("zstd_wsm_stream_bytes_total", "Bytes moved by the streaming drivers"),
        &["direction"]
    ).unwrap();
}

static INIT: Once = Once::new();

/// Pool events counted in [`WORKSPACE_EVENTS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Reuse,
    ReuseLarger,
    Alloc,
    AllocFailed,
    Wait,
    Reclaim,
    Release,
}

impl PoolEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolEvent::Reuse => "reuse",
            PoolEvent::ReuseLarger => "reuse_larger",
            PoolEvent::Alloc => "alloc",
            PoolEvent::AllocFailed => "alloc_failed",
            PoolEvent::Wait => "wait",
            PoolEvent::Reclaim => "reclaim",
            PoolEvent::Release => "release",
        }
    }
}

/// Register all metrics once
pub fn init_metrics() {
    INIT.call_once(|| {
        info!("Initializing Prometheus metrics");
        METRICS_REGISTRY.register(Box::new(WORKSPACE_EVENTS.clone())).ok();
        METRICS_REGISTRY.register(Box::new(IDLE_WORKSPACES.clone())).ok();
        METRICS_REGISTRY.register(Box::new(STREAM_BYTES.clone())).ok();
    });
}

pub fn record_event(event: PoolEvent, count: u64) {
    WORKSPACE_EVENTS
        .with_label_values(&[event.as_str()])
        .inc_by(count);
}

pub fn set_idle(count: usize) {
    IDLE_WORKSPACES.set(count as i64);
}

/// `direction` is "in" or "out"
pub fn record_stream_bytes(direction: &str, bytes: usize) {
    STREAM_BYTES
        .with_label_values(&[direction])
        .inc_by(bytes as u64);
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}
