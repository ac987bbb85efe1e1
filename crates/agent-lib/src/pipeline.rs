//! OOM-kill pipeline driver
//!
//! Consumes kernel log lines one at a time and runs each through
//! extract → resolve → record. A failure on one line is logged and never
//! affects the next one; there is no retry since the triggering line is not
//! delivered again.

use crate::aggregate::OomKillCounter;
use crate::extract::Extractor;
use crate::health::{components, HealthRegistry};
use crate::models::{KillMatch, LogLine};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::resolve::{ResolveError, Resolver};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, trace};

/// What happened to a single log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Not an OOM kill
    NoMatch,
    /// Counted under these label values
    Recorded { kill: KillMatch, labels: Vec<String> },
    /// Recognised as an OOM kill but not counted
    Dropped { kill: KillMatch, reason: &'static str },
}

/// Totals for one run of the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub lines: u64,
    pub matches: u64,
    pub recorded: u64,
    pub dropped: u64,
}

impl PipelineStats {
    fn observe(&mut self, outcome: &LineOutcome) {
        self.lines += 1;
        match outcome {
            LineOutcome::NoMatch => {}
            LineOutcome::Recorded { .. } => {
                self.matches += 1;
                self.recorded += 1;
            }
            LineOutcome::Dropped { .. } => {
                self.matches += 1;
                self.dropped += 1;
            }
        }
    }
}

pub struct Pipeline {
    extractor: Extractor,
    resolver: Resolver,
    counter: OomKillCounter,
    metrics: AgentMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl Pipeline {
    pub fn new(
        extractor: Extractor,
        resolver: Resolver,
        counter: OomKillCounter,
        metrics: AgentMetrics,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            extractor,
            resolver,
            counter,
            metrics,
            health,
            logger,
        }
    }

    /// Process lines until the source closes
    pub async fn run(self, mut lines: mpsc::Receiver<LogLine>) -> PipelineStats {
        info!(strategy = self.extractor.strategy_name(), "Starting OOM kill pipeline");
        let mut stats = PipelineStats::default();

        while let Some(line) = lines.recv().await {
            let outcome = self.process_line(&line).await;
            stats.observe(&outcome);
        }

        self.logger.log_source_closed(stats.lines);
        self.health
            .set_unhealthy(components::KMSG_SOURCE, "kernel log source closed")
            .await;

        stats
    }

    pub async fn process_line(&self, line: &LogLine) -> LineOutcome {
        self.metrics.inc_kmsg_lines();

        let Some(kill) = self.extractor.extract(&line.message) else {
            trace!(sequence = ?line.sequence, "Line is not an OOM kill");
            return LineOutcome::NoMatch;
        };
        self.metrics.inc_matches(kill.strategy());

        let start = Instant::now();
        let resolved = self.resolver.resolve(&kill).await;
        self.metrics
            .observe_resolve_latency(start.elapsed().as_secs_f64());

        let metadata = match resolved {
            Ok(metadata) => {
                self.health.report_success(components::RUNTIME).await;
                metadata
            }
            Err(e) => {
                match &e {
                    ResolveError::Runtime(runtime_error) => {
                        self.health
                            .report_failure(components::RUNTIME, runtime_error.to_string())
                            .await;
                    }
                    // The runtime answered; only the lookup came up empty
                    ResolveError::NotFound | ResolveError::Ambiguous { .. } => {
                        self.health.report_success(components::RUNTIME).await;
                    }
                }
                return self.drop_kill(kill, e.reason(), &e.to_string());
            }
        };

        match self.counter.record(&metadata) {
            Ok(labels) => {
                let names = self.counter.schema().metric_labels();
                let pairs: Vec<(&str, &str)> = names
                    .iter()
                    .copied()
                    .zip(labels.iter().map(String::as_str))
                    .collect();
                self.logger.log_oom_kill(&kill, &pairs);
                LineOutcome::Recorded { kill, labels }
            }
            Err(e) => self.drop_kill(kill, "record_error", &e.to_string()),
        }
    }

    fn drop_kill(&self, kill: KillMatch, reason: &'static str, details: &str) -> LineOutcome {
        self.metrics.inc_dropped(reason);
        self.logger.log_oom_kill_dropped(&kill, reason, details);
        LineOutcome::Dropped { kill, reason }
    }
}
