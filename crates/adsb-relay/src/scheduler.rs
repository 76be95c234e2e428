//! Fixed-interval cycle scheduling.
//!
//! Ticks are computed from a fixed origin, so fire times do not drift with
//! cycle duration. A tick that is missed because a cycle overran is skipped
//! rather than fired in a burst. Cancellation is honoured at cycle
//! boundaries only; a cycle in progress always runs to completion.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::processor::{CycleProcessor, CycleReport, UploadOutcome};
use crate::sink::UploadSink;
use crate::source::SnapshotSource;

/// What to do with a snapshot that lacks `now` or `aircraft`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedSnapshotPolicy {
    /// Log it and wait for the next cycle.
    #[default]
    Skip,
    /// Stop the scheduler with the error.
    Stop,
}

/// Counters accumulated over a scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Cycles started.
    pub cycles: u64,
    /// Cycles skipped because the receiver could not be read.
    pub fetch_failures: u64,
    /// Cycles skipped because the snapshot was malformed.
    pub malformed_snapshots: u64,
    /// Flights delivered to the sink.
    pub flights_uploaded: u64,
    /// Batches rolled back after a failed send.
    pub upload_failures: u64,
}

impl SchedulerStats {
    fn record(&mut self, report: &CycleReport) {
        match report.outcome {
            UploadOutcome::Delivered => self.flights_uploaded += report.batch_len as u64,
            UploadOutcome::RolledBack => self.upload_failures += 1,
            UploadOutcome::NothingToSend => {}
        }
    }
}

/// Drives a [`CycleProcessor`] at a fixed interval until cancelled.
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
    policy: MalformedSnapshotPolicy,
    max_cycles: Option<u64>,
    token: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler that stops when `token` is cancelled.
    #[must_use]
    pub fn new(interval: Duration, token: CancellationToken) -> Self {
        Self {
            interval,
            policy: MalformedSnapshotPolicy::default(),
            max_cycles: None,
            token,
        }
    }

    /// Create a scheduler from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config, token: CancellationToken) -> Self {
        Self::new(config.retrieval_interval(), token)
            .with_policy(config.runtime.on_malformed_snapshot)
    }

    /// Set the malformed snapshot policy.
    #[must_use]
    pub fn with_policy(mut self, policy: MalformedSnapshotPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stop after this many cycles.
    #[must_use]
    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// The token that stops this scheduler.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run cycles until cancelled or the cycle limit is reached.
    ///
    /// The first cycle starts immediately. Fetch and upload failures are
    /// logged and the loop carries on.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is zero, or if a malformed snapshot
    /// is received under [`MalformedSnapshotPolicy::Stop`].
    pub async fn run<S, U>(
        &self,
        processor: &mut CycleProcessor,
        source: &S,
        sink: &U,
    ) -> Result<SchedulerStats>
    where
        S: SnapshotSource + ?Sized,
        U: UploadSink + ?Sized,
    {
        if self.interval.is_zero() {
            return Err(Error::config_validation("scheduler interval must be positive"));
        }

        let mut ticker = interval_at(Instant::now(), self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = SchedulerStats::default();

        info!(
            interval_ms = self.interval.as_millis(),
            sink = sink.name(),
            "Scheduler started"
        );

        loop {
            if self.max_cycles.is_some_and(|max| stats.cycles >= max) {
                info!(cycles = stats.cycles, "Cycle limit reached");
                break;
            }

            tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    info!(cycles = stats.cycles, "Cancelled, stopping scheduler");
                    break;
                }
                _ = ticker.tick() => {}
            }

            stats.cycles += 1;
            match source.fetch().await {
                Ok(snapshot) => {
                    let report = processor.process(&snapshot, sink).await;
                    stats.record(&report);
                    let store = processor.store().stats();
                    debug!(
                        cycle = stats.cycles,
                        observed = report.observed,
                        dropped = report.dropped,
                        created = report.created,
                        merged = report.merged,
                        stale = report.stale,
                        batch_len = report.batch_len,
                        expired = report.expired,
                        tracking = store.tracking,
                        uploaded = store.uploaded,
                        "Cycle complete"
                    );
                }
                Err(e) if e.is_malformed_snapshot() => {
                    stats.malformed_snapshots += 1;
                    match self.policy {
                        MalformedSnapshotPolicy::Skip => {
                            warn!(error = %e, "Malformed snapshot, skipping cycle");
                        }
                        MalformedSnapshotPolicy::Stop => {
                            error!(error = %e, "Malformed snapshot, stopping");
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    stats.fetch_failures += 1;
                    warn!(error = %e, "Fetch failed, skipping cycle");
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::init_test_logging;
    use crate::observation::{Observation, Snapshot};
    use crate::processor::{ProcessorSettings, RollbackMatching};
    use crate::sink::UploadBatch;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of fetch results, then fails every fetch.
    #[derive(Debug)]
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Snapshot>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Snapshot>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn fetch(&self) -> Result<Snapshot> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::fetch("scripted", "script exhausted")))
        }
    }

    #[derive(Debug, Default)]
    struct CountingSink {
        batches: Mutex<Vec<UploadBatch>>,
    }

    #[async_trait]
    impl UploadSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn send(&self, batch: &UploadBatch) -> Result<()> {
            self.batches.lock().unwrap().push(batch.clone());
            Ok(())
        }
    }

    fn processor() -> CycleProcessor {
        init_test_logging();
        CycleProcessor::new(ProcessorSettings {
            location: "rooftop".to_string(),
            retrieval_interval: Duration::from_secs(10),
            cleanup_ttl: chrono::Duration::minutes(5),
            rollback_matching: RollbackMatching::ModeSCode,
        })
    }

    fn snapshot(now: i64, ids: &[&str]) -> Snapshot {
        let observations = ids
            .iter()
            .map(|id| Observation {
                mode_s_code: (*id).to_string(),
                flight_number: "UAL123".to_string(),
                seen: 1.0,
                altitude: 10000,
                latitude: Some(1.0),
                longitude: Some(2.0),
                track: Some(90.0),
            })
            .collect();
        Snapshot::new(DateTime::from_timestamp(now, 0).unwrap(), observations)
    }

    fn scheduler(max_cycles: u64) -> Scheduler {
        Scheduler::new(Duration::from_millis(10), CancellationToken::new())
            .with_max_cycles(Some(max_cycles))
    }

    #[tokio::test]
    async fn test_runs_until_cycle_limit() {
        let source = ScriptedSource::new(vec![
            Ok(snapshot(1000, &["A1B2C3"])),
            Ok(snapshot(1010, &[])),
        ]);
        let sink = CountingSink::default();
        let mut processor = processor();

        let stats = scheduler(2).run(&mut processor, &source, &sink).await.unwrap();

        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.flights_uploaded, 1);
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        assert!(processor.store().get("A1B2C3").unwrap().is_uploaded());
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_cycle() {
        let source = ScriptedSource::new(vec![
            Err(Error::fetch("scripted", "connection refused")),
            Ok(snapshot(1010, &["A1B2C3"])),
        ]);
        let sink = CountingSink::default();
        let mut processor = processor();

        let stats = scheduler(2).run(&mut processor, &source, &sink).await.unwrap();

        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.fetch_failures, 1);
        assert_eq!(processor.store().len(), 1);
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_upload_tracked_flights() {
        let source = ScriptedSource::new(vec![
            Ok(snapshot(1000, &["A1B2C3"])),
            Err(Error::fetch("scripted", "timed out")),
        ]);
        let sink = CountingSink::default();
        let mut processor = processor();

        scheduler(2).run(&mut processor, &source, &sink).await.unwrap();

        assert!(!processor.store().get("A1B2C3").unwrap().is_uploaded());
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_snapshot_skipped_by_default() {
        let source = ScriptedSource::new(vec![
            Err(Error::malformed_snapshot("missing `now`")),
            Ok(snapshot(1010, &["A1B2C3"])),
        ]);
        let sink = CountingSink::default();
        let mut processor = processor();

        let stats = scheduler(2).run(&mut processor, &source, &sink).await.unwrap();

        assert_eq!(stats.malformed_snapshots, 1);
        assert_eq!(processor.store().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_snapshot_stops_when_configured() {
        let source = ScriptedSource::new(vec![
            Err(Error::malformed_snapshot("missing `aircraft`")),
            Ok(snapshot(1010, &["A1B2C3"])),
        ]);
        let sink = CountingSink::default();
        let mut processor = processor();

        let err = scheduler(2)
            .with_policy(MalformedSnapshotPolicy::Stop)
            .run(&mut processor, &source, &sink)
            .await
            .unwrap_err();

        assert!(err.is_malformed_snapshot());
        assert!(processor.store().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_no_cycle() {
        let token = CancellationToken::new();
        token.cancel();
        let scheduler = Scheduler::new(Duration::from_millis(10), token);
        let source = ScriptedSource::new(vec![Ok(snapshot(1000, &["A1B2C3"]))]);
        let mut processor = processor();

        let stats = scheduler
            .run(&mut processor, &source, &CountingSink::default())
            .await
            .unwrap();

        assert_eq!(stats.cycles, 0);
        assert!(processor.store().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_ends_wait_immediately() {
        let token = CancellationToken::new();
        let scheduler = Scheduler::new(Duration::from_secs(3600), token.clone());
        let source = ScriptedSource::new(vec![Ok(snapshot(1000, &["A1B2C3"]))]);
        let mut processor = processor();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.run(&mut processor, &source, &CountingSink::default()),
        )
        .await
        .expect("scheduler did not stop")
        .unwrap();
        canceller.await.unwrap();

        assert_eq!(stats.cycles, 1);
        assert_eq!(processor.store().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let scheduler = Scheduler::new(Duration::ZERO, CancellationToken::new());
        let source = ScriptedSource::new(vec![]);
        let mut processor = processor();

        let err = scheduler
            .run(&mut processor, &source, &CountingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.runtime.on_malformed_snapshot = MalformedSnapshotPolicy::Stop;

        let scheduler = Scheduler::from_config(&config, CancellationToken::new());
        assert_eq!(scheduler.interval, Duration::from_secs(10));
        assert_eq!(scheduler.policy, MalformedSnapshotPolicy::Stop);
        assert!(scheduler.max_cycles.is_none());
        assert!(!scheduler.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_policy_serde() {
        let parsed: MalformedSnapshotPolicy = serde_json::from_str("\"stop\"").unwrap();
        assert_eq!(parsed, MalformedSnapshotPolicy::Stop);
        assert_eq!(
            serde_json::to_string(&MalformedSnapshotPolicy::Skip).unwrap(),
            "\"skip\""
        );
    }
}
