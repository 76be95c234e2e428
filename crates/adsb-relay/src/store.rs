//! In-memory flight record store.
//!
//! The store holds exactly one [`FlightState`] per mode-S address for the
//! lifetime of the process. It is owned by the cycle processor and only ever
//! touched from one cycle at a time, so it needs no locking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::flight::FlightState;

/// Flight records keyed by mode-S address.
///
/// The store also remembers when each address was first inserted. Replacing
/// a record keeps its position; removing it and inserting again moves it to
/// the end.
#[derive(Debug, Default)]
pub struct FlightStore {
    flights: HashMap<String, FlightState>,
    inserted: HashMap<String, u64>,
    next_seq: u64,
}

impl FlightStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the record for an address.
    #[must_use]
    pub fn get(&self, mode_s_code: &str) -> Option<&FlightState> {
        self.flights.get(mode_s_code)
    }

    /// Check if an address is tracked.
    #[must_use]
    pub fn contains(&self, mode_s_code: &str) -> bool {
        self.flights.contains_key(mode_s_code)
    }

    /// Insert or replace the record for `state.mode_s_code`.
    pub fn upsert(&mut self, state: FlightState) {
        if !self.inserted.contains_key(&state.mode_s_code) {
            self.inserted
                .insert(state.mode_s_code.clone(), self.next_seq);
            self.next_seq += 1;
        }
        self.flights.insert(state.mode_s_code.clone(), state);
    }

    /// Remove the record for an address.
    pub fn remove(&mut self, mode_s_code: &str) -> Option<FlightState> {
        self.inserted.remove(mode_s_code);
        self.flights.remove(mode_s_code)
    }

    /// The earliest inserted record carrying `flight_number`, in any phase.
    #[must_use]
    pub fn first_by_flight_number(&self, flight_number: &str) -> Option<&FlightState> {
        self.flights
            .values()
            .filter(|state| state.flight_number == flight_number)
            .min_by_key(|state| {
                self.inserted
                    .get(&state.mode_s_code)
                    .copied()
                    .unwrap_or(u64::MAX)
            })
    }

    /// Iterate over all records in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &FlightState> {
        self.flights.values()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    /// Addresses of records that have not been uploaded.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.flights
            .values()
            .filter(|state| !state.is_uploaded())
            .map(|state| state.mode_s_code.clone())
            .collect()
    }

    /// Stamp a record as uploaded.
    ///
    /// Returns the stamped record, or `None` if the address is unknown or
    /// the record already carries an upload stamp.
    pub fn mark_uploaded(&mut self, mode_s_code: &str, at: DateTime<Utc>) -> Option<&FlightState> {
        let state = self.flights.get_mut(mode_s_code)?;
        if state.is_uploaded() {
            return None;
        }
        state.uploaded_time = Some(at);
        Some(&*state)
    }

    /// Clear the upload stamp of a record so it is offered again.
    ///
    /// Returns `true` if a stamp was cleared.
    pub fn clear_uploaded(&mut self, mode_s_code: &str) -> bool {
        self.flights
            .get_mut(mode_s_code)
            .and_then(|state| state.uploaded_time.take())
            .is_some()
    }

    /// Remove every record uploaded more than `ttl` before `now`.
    ///
    /// Returns the removed addresses.
    pub fn expire(&mut self, now: DateTime<Utc>, ttl: chrono::Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .flights
            .values()
            .filter(|state| state.is_expired(now, ttl))
            .map(|state| state.mode_s_code.clone())
            .collect();

        for mode_s_code in &expired {
            self.remove(mode_s_code);
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired uploaded flights");
        }
        expired
    }

    /// Get store statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let uploaded = self.flights.values().filter(|s| s.is_uploaded()).count();
        StoreStats {
            total: self.flights.len(),
            tracking: self.flights.len() - uploaded,
            uploaded,
        }
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Total number of records.
    pub total: usize,
    /// Records still being tracked (including failed uploads awaiting retry).
    pub tracking: usize,
    /// Records uploaded and waiting to expire.
    pub uploaded: usize,
}
