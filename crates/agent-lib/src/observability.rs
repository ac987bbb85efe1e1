//! Observability infrastructure for the exporter
//!
//! Provides:
//! - Prometheus self-metrics (lines read, matches, dropped events, resolve latency)
//! - Structured JSON logging with tracing

use crate::models::KillMatch;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use tracing::{info, warn};

/// Histogram buckets for runtime resolution latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Pipeline self-metrics, registered next to the OOM-kill counter.
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    kmsg_lines: IntCounter,
    matches: IntCounterVec,
    dropped_events: IntCounterVec,
    resolve_latency_seconds: Histogram,
}

impl AgentMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let kmsg_lines = IntCounter::new(
            "oomkill_exporter_kmsg_lines_total",
            "Kernel log lines examined",
        )?;
        let matches = IntCounterVec::new(
            Opts::new(
                "oomkill_exporter_matches_total",
                "Kernel log lines recognised as OOM kills",
            ),
            &["strategy"],
        )?;
        let dropped_events = IntCounterVec::new(
            Opts::new(
                "oomkill_exporter_dropped_events_total",
                "OOM kills that could not be attributed to a workload",
            ),
            &["reason"],
        )?;
        let resolve_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "oomkill_exporter_resolve_latency_seconds",
                "Time spent querying the container runtime",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(kmsg_lines.clone()))?;
        registry.register(Box::new(matches.clone()))?;
        registry.register(Box::new(dropped_events.clone()))?;
        registry.register(Box::new(resolve_latency_seconds.clone()))?;

        Ok(Self {
            kmsg_lines,
            matches,
            dropped_events,
            resolve_latency_seconds,
        })
    }

    pub fn inc_kmsg_lines(&self) {
        self.kmsg_lines.inc();
    }

    pub fn inc_matches(&self, strategy: &str) {
        self.matches.with_label_values(&[strategy]).inc();
    }

    pub fn inc_dropped(&self, reason: &str) {
        self.dropped_events.with_label_values(&[reason]).inc();
    }

    pub fn observe_resolve_latency(&self, duration_secs: f64) {
        self.resolve_latency_seconds.observe(duration_secs);
    }

    pub fn kmsg_lines(&self) -> u64 {
        self.kmsg_lines.get()
    }

    pub fn dropped(&self, reason: &str) -> u64 {
        self.dropped_events.with_label_values(&[reason]).get()
    }
}

/// Structured logger for exporter events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, listen_address: &str, strategy: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            listen_address = %listen_address,
            strategy = %strategy,
            "OOM kill exporter started"
        );
    }

    /// Log an OOM kill that was attributed and counted
    pub fn log_oom_kill(&self, kill: &KillMatch, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(",");

        info!(
            event = "oom_kill_recorded",
            node = %self.node_name,
            pod_uid = %kill.pod_uid(),
            container_id = %kill.container_id().unwrap_or(""),
            labels = %labels,
            "OOM kill recorded"
        );
    }

    /// Log an OOM kill that could not be counted
    pub fn log_oom_kill_dropped(&self, kill: &KillMatch, reason: &str, details: &str) {
        warn!(
            event = "oom_kill_dropped",
            node = %self.node_name,
            pod_uid = %kill.pod_uid(),
            container_id = %kill.container_id().unwrap_or(""),
            reason = %reason,
            details = %details,
            "Could not attribute OOM kill to {}",
            kill
        );
    }

    pub fn log_source_closed(&self, lines: u64) {
        warn!(
            event = "log_source_closed",
            node = %self.node_name,
            lines = lines,
            "Kernel log source closed, no further OOM kills will be recorded"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "OOM kill exporter shutting down"
        );
    }
}
