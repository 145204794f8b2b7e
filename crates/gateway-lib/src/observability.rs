//! Observability infrastructure for the gateway
//!
//! Provides:
//! - Prometheus metrics (tunnel, command and scoring latency, failure counters)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Tunnel setup and remote commands run in the hundreds of milliseconds to
/// tens of seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

static GLOBAL_METRICS: OnceLock<GatewayMetricsInner> = OnceLock::new();

struct GatewayMetricsInner {
    tunnel_open_seconds: Histogram,
    command_seconds: Histogram,
    score_seconds: Histogram,
    tunnel_failures: IntCounterVec,
    polls_skipped: IntCounter,
    score_failures: IntCounter,
    containers_flagged: IntGaugeVec,
    decode_dropped_lines: IntCounter,
}

impl GatewayMetricsInner {
    fn new() -> Self {
        Self {
            tunnel_open_seconds: register_histogram!(
                "hop_gateway_tunnel_open_seconds",
                "Time to open a bastion to VM tunnel",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tunnel_open_seconds"),

            command_seconds: register_histogram!(
                "hop_gateway_command_seconds",
                "Time spent running a remote command",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register command_seconds"),

            score_seconds: register_histogram!(
                "hop_gateway_score_seconds",
                "Time spent scoring one container",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register score_seconds"),

            tunnel_failures: register_int_counter_vec!(
                "hop_gateway_tunnel_failures_total",
                "Tunnels that failed to open, by handshake stage",
                &["stage"]
            )
            .expect("Failed to register tunnel_failures_total"),

            polls_skipped: register_int_counter!(
                "hop_gateway_polls_skipped_total",
                "Metrics polls dropped because one was already in flight"
            )
            .expect("Failed to register polls_skipped_total"),

            score_failures: register_int_counter!(
                "hop_gateway_score_failures_total",
                "Scoring attempts that failed and defaulted to no warning"
            )
            .expect("Failed to register score_failures_total"),

            containers_flagged: register_int_gauge_vec!(
                "hop_gateway_containers_flagged",
                "Containers flagged anomalous in the last poll of each VM",
                &["vm"]
            )
            .expect("Failed to register containers_flagged"),

            decode_dropped_lines: register_int_counter!(
                "hop_gateway_decode_dropped_lines_total",
                "Malformed line-JSON records skipped while decoding"
            )
            .expect("Failed to register decode_dropped_lines_total"),
        }
    }
}

/// Handle on the process-wide gateway metrics
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct GatewayMetrics {
    _private: (),
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GatewayMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GatewayMetricsInner {
        GLOBAL_METRICS.get_or_init(GatewayMetricsInner::new)
    }

    pub fn observe_tunnel_open(&self, duration_secs: f64) {
        self.inner().tunnel_open_seconds.observe(duration_secs);
    }

    pub fn observe_command_latency(&self, duration_secs: f64) {
        self.inner().command_seconds.observe(duration_secs);
    }

    pub fn observe_score_latency(&self, duration_secs: f64) {
        self.inner().score_seconds.observe(duration_secs);
    }

    pub fn inc_tunnel_failures(&self, stage: &str) {
        self.inner()
            .tunnel_failures
            .with_label_values(&[stage])
            .inc();
    }

    pub fn inc_polls_skipped(&self) {
        self.inner().polls_skipped.inc();
    }

    pub fn inc_score_failures(&self) {
        self.inner().score_failures.inc();
    }

    pub fn set_containers_flagged(&self, vm: &str, count: i64) {
        self.inner()
            .containers_flagged
            .with_label_values(&[vm])
            .set(count);
    }

    pub fn add_decode_dropped_lines(&self, count: u64) {
        if count > 0 {
            self.inner().decode_dropped_lines.inc_by(count);
        }
    }
}

/// Structured logger for gateway lifecycle events
///
/// Every event carries an `event` field and the bastion it goes through.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    bastion: String,
}

impl StructuredLogger {
    pub fn new(bastion: impl Into<String>) -> Self {
        Self {
            bastion: bastion.into(),
        }
    }

    pub fn log_startup(&self, version: &str, vm_count: usize, api_port: u16) {
        info!(
            event = "gateway_started",
            bastion = %self.bastion,
            gateway_version = %version,
            vm_count = vm_count,
            api_port = api_port,
            "Hop gateway started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "gateway_shutdown",
            bastion = %self.bastion,
            reason = %reason,
            "Hop gateway shutting down"
        );
    }

    pub fn log_tunnel_opened(&self, vm: &str, host: &str, elapsed_ms: u64) {
        info!(
            event = "tunnel_opened",
            bastion = %self.bastion,
            vm = %vm,
            host = %host,
            elapsed_ms = elapsed_ms,
            "Tunnel opened"
        );
    }

    pub fn log_tunnel_failed(&self, vm: &str, stage: &str, error: &str) {
        warn!(
            event = "tunnel_failed",
            bastion = %self.bastion,
            vm = %vm,
            stage = %stage,
            error = %error,
            "Tunnel failed to open"
        );
    }

    pub fn log_poll_completed(&self, vm: &str, containers: usize, flagged: usize, elapsed_ms: u64) {
        info!(
            event = "poll_completed",
            bastion = %self.bastion,
            vm = %vm,
            containers = containers,
            flagged = flagged,
            elapsed_ms = elapsed_ms,
            "Metrics poll completed"
        );
    }

    pub fn log_poll_skipped(&self, vm: &str) {
        info!(
            event = "poll_skipped",
            bastion = %self.bastion,
            vm = %vm,
            "Metrics poll already in flight, skipping"
        );
    }

    pub fn log_score_failed(&self, vm: &str, container: &str, error: &str) {
        warn!(
            event = "score_failed",
            bastion = %self.bastion,
            vm = %vm,
            container = %container,
            error = %error,
            "Scoring failed, container reported without warning"
        );
    }
}
