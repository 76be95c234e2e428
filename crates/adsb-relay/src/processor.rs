//! One polling cycle: merge, detect departures, upload, roll back, expire.
//!
//! The processor owns the [`FlightStore`]. Each call to
//! [`CycleProcessor::process`] runs a whole cycle to completion; the caller
//! must not start another one until it returns.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::merge::{merge, MergeContext};
use crate::observation::Snapshot;
use crate::sink::{UploadBatch, UploadSink};
use crate::store::FlightStore;

/// How the records of a failed batch are located for rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackMatching {
    /// Match by mode-S address; only records of the failed batch are touched.
    #[default]
    ModeSCode,
    /// Legacy matching by flight number: for each failed event the earliest
    /// inserted record with the same flight number is re-armed, even if it
    /// was not part of the batch. Callsign reuse can therefore re-arm the
    /// wrong aircraft.
    FlightNumber,
}

/// Fixed parameters of the cycle processor.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Receiver identifier stamped on every record.
    pub location: String,
    /// Polling interval; observations older than this are not merged.
    pub retrieval_interval: Duration,
    /// How long uploaded records are kept.
    pub cleanup_ttl: chrono::Duration,
    /// Rollback matching mode.
    pub rollback_matching: RollbackMatching,
}

impl ProcessorSettings {
    /// Derive settings from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            location: config.device.device_id.clone(),
            retrieval_interval: config.retrieval_interval(),
            cleanup_ttl: config.cleanup_ttl(),
            rollback_matching: config.upload.rollback_match,
        }
    }
}

/// What happened to the cycle's upload batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadOutcome {
    /// No flight disappeared this cycle.
    #[default]
    NothingToSend,
    /// The sink accepted the batch.
    Delivered,
    /// The sink failed and the batch was rolled back.
    RolledBack,
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Valid observations in the snapshot.
    pub observed: usize,
    /// Records dropped while parsing the snapshot.
    pub dropped: usize,
    /// Aircraft seen for the first time.
    pub created: usize,
    /// Existing flights updated.
    pub merged: usize,
    /// Flights kept alive without merging because their data was stale.
    pub stale: usize,
    /// Observations of already uploaded flights.
    pub skipped_uploaded: usize,
    /// Flights in the upload batch.
    pub batch_len: usize,
    /// Records whose upload stamp was cleared after a failed send.
    pub rolled_back: usize,
    /// Records removed by the expiry sweep.
    pub expired: usize,
    /// Fate of the upload batch.
    pub outcome: UploadOutcome,
}

/// Runs polling cycles against a flight store.
#[derive(Debug)]
pub struct CycleProcessor {
    settings: ProcessorSettings,
    store: FlightStore,
}

impl CycleProcessor {
    /// Create a processor with an empty store.
    #[must_use]
    pub fn new(settings: ProcessorSettings) -> Self {
        Self {
            settings,
            store: FlightStore::new(),
        }
    }

    /// The processor's settings.
    #[must_use]
    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Read access to the flight store.
    #[must_use]
    pub fn store(&self) -> &FlightStore {
        &self.store
    }

    /// Run one cycle over `snapshot`, delivering departed flights to `sink`.
    ///
    /// Upload failures are logged and rolled back, never returned.
    pub async fn process<S>(&mut self, snapshot: &Snapshot, sink: &S) -> CycleReport
    where
        S: UploadSink + ?Sized,
    {
        let now = snapshot.captured_at;
        let mut report = CycleReport {
            observed: snapshot.len(),
            dropped: snapshot.dropped,
            ..CycleReport::default()
        };

        let current = self.ingest(snapshot, &mut report);
        let (departed, batch) = self.collect_departed(&current, now);
        report.batch_len = batch.len();

        if !batch.is_empty() {
            match sink.send(&batch).await {
                Ok(()) => {
                    info!(batch_len = batch.len(), sink = sink.name(), "Uploaded departed flights");
                    report.outcome = UploadOutcome::Delivered;
                }
                Err(e) => {
                    warn!(error = %e, batch_len = batch.len(), "Upload failed, will retry next cycle");
                    report.rolled_back = self.roll_back(&departed, &batch);
                    report.outcome = UploadOutcome::RolledBack;
                }
            }
        }

        report.expired = self.store.expire(now, self.settings.cleanup_ttl).len();
        report
    }

    /// Merge the snapshot into the store and return the ids present this cycle.
    fn ingest(&mut self, snapshot: &Snapshot, report: &mut CycleReport) -> HashSet<String> {
        let ctx = MergeContext {
            location: &self.settings.location,
            captured_at: snapshot.captured_at,
        };
        let max_age_secs = self.settings.retrieval_interval.as_secs_f64();
        let mut current = HashSet::with_capacity(snapshot.len());

        for observation in &snapshot.observations {
            let id = &observation.mode_s_code;
            match self.store.get(id) {
                None => {
                    debug!(mode_s_code = %id, flight_number = %observation.flight_number, "New aircraft");
                    self.store.upsert(merge(None, observation, ctx));
                    report.created += 1;
                }
                Some(state) if state.is_uploaded() => {
                    report.skipped_uploaded += 1;
                    continue;
                }
                Some(_) if observation.is_stale(max_age_secs) => {
                    // Reception gap: still present, nothing new to merge.
                    report.stale += 1;
                }
                Some(state) => {
                    let next = merge(Some(state), observation, ctx);
                    self.store.upsert(next);
                    report.merged += 1;
                }
            }
            current.insert(id.clone());
        }

        current
    }

    /// Stamp every tracked flight missing from `current` and batch it.
    fn collect_departed(
        &mut self,
        current: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> (Vec<String>, UploadBatch) {
        let mut departed: Vec<String> = self
            .store
            .pending_ids()
            .into_iter()
            .filter(|id| !current.contains(id))
            .collect();
        departed.sort_unstable();

        let mut batch = UploadBatch::default();
        for id in &departed {
            if let Some(event) = self
                .store
                .mark_uploaded(id, now)
                .and_then(|state| state.to_event())
            {
                debug!(mode_s_code = %id, flight_number = %event.flight_number, "Flight departed");
                batch.push(event);
            }
        }

        (departed, batch)
    }

    /// Clear the upload stamp of the failed batch's records.
    fn roll_back(&mut self, departed: &[String], batch: &UploadBatch) -> usize {
        match self.settings.rollback_matching {
            RollbackMatching::ModeSCode => departed
                .iter()
                .filter(|id| self.store.clear_uploaded(id))
                .count(),
            RollbackMatching::FlightNumber => {
                let mut cleared = 0;
                for event in batch.events() {
                    let first_match = self
                        .store
                        .first_by_flight_number(&event.flight_number)
                        .map(|state| state.mode_s_code.clone());
                    if let Some(id) = first_match {
                        if self.store.clear_uploaded(&id) {
                            cleared += 1;
                        }
                    }
                }
                cleared
            }
        }
    }
}
