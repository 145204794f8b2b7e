//! Metrics polling: fetch `docker stats`, score every container, merge
//!
//! ```text
//! poll_vm ─▶ single-flight ─▶ tunnel + stats ─▶ decode ─▶ score (fan-out) ─▶ merge
//! ```
//!
//! The tunnel is closed as soon as the stats command returns; scoring is
//! local and never holds a remote connection.

mod single_flight;

#[cfg(test)]
mod tests;

pub use single_flight::{FlightGuard, SingleFlight};

use crate::decode::decode_lines;
use crate::docker::command;
use crate::error::{GatewayError, TunnelError};
use crate::exec::CommandRunner;
use crate::health::components;
use crate::models::{ContainerRecord, PredictionInput};
use crate::observability::{GatewayMetrics, StructuredLogger};
use crate::predictor::Scorer;
use crate::tunnel::SshTransport;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Result of a poll request
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Records in `docker stats` order, each with `warning` set
    Completed(Vec<ContainerRecord>),
    /// Another poll for the same VM was running; nothing was done
    AlreadyInFlight,
}

/// Coordinates stats fetching and scoring for the VMs
pub struct MetricsOrchestrator<T: SshTransport, S: Scorer + 'static> {
    runner: CommandRunner<T>,
    scorer: Arc<S>,
    in_flight: SingleFlight,
    metrics: GatewayMetrics,
    logger: StructuredLogger,
}

impl<T: SshTransport, S: Scorer + 'static> Clone for MetricsOrchestrator<T, S> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            scorer: Arc::clone(&self.scorer),
            in_flight: self.in_flight.clone(),
            metrics: self.metrics.clone(),
            logger: self.logger.clone(),
        }
    }
}

impl<T: SshTransport, S: Scorer + 'static> MetricsOrchestrator<T, S> {
    pub fn new(runner: CommandRunner<T>, scorer: S) -> Self {
        let logger = runner.tunnels().logger().clone();
        Self {
            runner,
            scorer: Arc::new(scorer),
            in_flight: SingleFlight::new(),
            metrics: GatewayMetrics::new(),
            logger,
        }
    }

    /// True while a poll for `vm` is running
    pub fn is_polling(&self, vm: &str) -> bool {
        self.in_flight.is_in_flight(vm)
    }

    /// Fetch and score the containers of `vm`
    ///
    /// Returns [`PollOutcome::AlreadyInFlight`] without touching the network
    /// when a poll for `vm` is already running.
    pub async fn poll_vm(&self, vm: &str) -> Result<PollOutcome, GatewayError> {
        if self.runner.tunnels().registry().resolve(vm).is_none() {
            return Err(TunnelError::UnknownVm(vm.to_string()).into());
        }

        let Some(_flight) = self.in_flight.try_acquire(vm) else {
            self.metrics.inc_polls_skipped();
            self.logger.log_poll_skipped(vm);
            return Ok(PollOutcome::AlreadyInFlight);
        };

        let start = Instant::now();
        let records = self.fetch_stats(vm).await?;
        let records = self.score_all(vm, records).await;

        let flagged = records
            .iter()
            .filter(|r| r.warning == Some(true))
            .count();
        self.metrics.set_containers_flagged(vm, flagged as i64);
        self.logger.log_poll_completed(
            vm,
            records.len(),
            flagged,
            start.elapsed().as_millis() as u64,
        );

        Ok(PollOutcome::Completed(records))
    }

    async fn fetch_stats(&self, vm: &str) -> Result<Vec<ContainerRecord>, GatewayError> {
        let output = self.runner.run(vm, &command::stats().render()).await?;

        let decoded = decode_lines::<ContainerRecord>(&output.stdout);
        self.metrics.add_decode_dropped_lines(decoded.malformed as u64);
        if decoded.malformed > 0 {
            debug!(vm = %vm, malformed = decoded.malformed, "Skipped malformed stats lines");
        }

        if decoded.records.is_empty() {
            return Err(GatewayError::NoMetricsData { vm: vm.to_string() });
        }
        Ok(decoded.records)
    }

    /// Score every record concurrently and attach `warning`
    ///
    /// Output order matches input order. A failed score yields
    /// `warning = false` for that record only.
    pub async fn score_all(&self, vm: &str, mut records: Vec<ContainerRecord>) -> Vec<ContainerRecord> {
        let mut tasks = JoinSet::new();
        for (index, record) in records.iter().enumerate() {
            let scorer = Arc::clone(&self.scorer);
            let input = PredictionInput::from_record(record);
            tasks.spawn(async move {
                let start = Instant::now();
                let result = scorer.score(&input).await;
                (index, result, start.elapsed())
            });
        }

        let mut verdicts: Vec<Option<bool>> = vec![None; records.len()];
        let mut failures = 0usize;

        while let Some(joined) = tasks.join_next().await {
            let (index, result, elapsed) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(vm = %vm, error = %e, "Scoring task aborted");
                    failures += 1;
                    continue;
                }
            };
            self.metrics.observe_score_latency(elapsed.as_secs_f64());

            match result {
                Ok(verdict) => verdicts[index] = Some(verdict.is_warning()),
                Err(e) => {
                    failures += 1;
                    self.metrics.inc_score_failures();
                    self.logger
                        .log_score_failed(vm, records[index].display_name(), &e.to_string());
                }
            }
        }

        for (record, verdict) in records.iter_mut().zip(verdicts) {
            record.warning = Some(verdict.unwrap_or(false));
        }

        if let Some(health) = self.runner.health() {
            if failures == 0 {
                health.set_healthy(components::SCORER).await;
            } else {
                health
                    .set_degraded(
                        components::SCORER,
                        format!("{} of {} scores failed on {}", failures, records.len(), vm),
                    )
                    .await;
            }
        }

        records
    }
}
