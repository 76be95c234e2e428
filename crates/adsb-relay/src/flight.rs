//! Aggregated per-aircraft state and its upload form.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::observation::PositionFix;

/// Altitude trend derived from the sign of the ascent counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// More descents than climbs have been observed.
    Descending,
    /// No net altitude change beyond jitter.
    Level,
    /// More climbs than descents have been observed.
    Ascending,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Descending => write!(f, "descending"),
            Self::Level => write!(f, "level"),
            Self::Ascending => write!(f, "ascending"),
        }
    }
}

/// Where a record is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightPhase {
    /// Still in view, or disappeared and waiting for a retried upload.
    Tracking,
    /// Handed to the sink; kept only until its TTL runs out.
    Uploaded,
}

impl std::fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tracking => write!(f, "tracking"),
            Self::Uploaded => write!(f, "uploaded"),
        }
    }
}

/// Everything known about one aircraft.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightState {
    /// Mode-S address, the store key.
    pub mode_s_code: String,
    /// Identifier of the receiver that saw the aircraft.
    pub location: String,
    /// Latest flight number reported for this address.
    pub flight_number: String,
    /// Last known altitude in feet; 0 means unknown.
    pub altitude: i64,
    /// Latitude of the retained fix.
    pub latitude: Option<f64>,
    /// Longitude of the retained fix.
    pub longitude: Option<f64>,
    /// Heading of the retained fix.
    pub heading: Option<f64>,
    /// Net count of climbs minus descents.
    pub ascent_count: i32,
    /// When the aircraft was at the retained position.
    pub time_at_location: DateTime<Utc>,
    /// When the record was handed to the upload sink.
    pub uploaded_time: Option<DateTime<Utc>>,
}

impl FlightState {
    /// Create an empty record for a newly sighted aircraft.
    #[must_use]
    pub fn new(
        mode_s_code: impl Into<String>,
        location: impl Into<String>,
        first_seen: DateTime<Utc>,
    ) -> Self {
        Self {
            mode_s_code: mode_s_code.into(),
            location: location.into(),
            flight_number: String::new(),
            altitude: 0,
            latitude: None,
            longitude: None,
            heading: None,
            ascent_count: 0,
            time_at_location: first_seen,
            uploaded_time: None,
        }
    }

    /// Altitude trend implied by the ascent counter.
    #[must_use]
    pub fn trend(&self) -> Trend {
        match self.ascent_count.signum() {
            -1 => Trend::Descending,
            1 => Trend::Ascending,
            _ => Trend::Level,
        }
    }

    /// Lifecycle phase of this record.
    #[must_use]
    pub fn phase(&self) -> FlightPhase {
        if self.uploaded_time.is_some() {
            FlightPhase::Uploaded
        } else {
            FlightPhase::Tracking
        }
    }

    /// Check if the record has been handed to the sink.
    #[must_use]
    pub fn is_uploaded(&self) -> bool {
        self.uploaded_time.is_some()
    }

    /// Check if latitude, longitude and heading are all known.
    #[must_use]
    pub fn has_fix(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some() && self.heading.is_some()
    }

    /// Replace the retained position fix.
    pub fn set_fix(&mut self, fix: PositionFix, at: DateTime<Utc>) {
        self.latitude = Some(fix.latitude);
        self.longitude = Some(fix.longitude);
        self.heading = Some(fix.heading);
        self.time_at_location = at;
    }

    /// Check if the record was uploaded more than `ttl` before `now`.
    ///
    /// A deadline beyond the representable range never expires.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.uploaded_time
            .and_then(|uploaded| uploaded.checked_add_signed(ttl))
            .is_some_and(|deadline| now > deadline)
    }

    /// Upload form of this record, available once it has been stamped.
    #[must_use]
    pub fn to_event(&self) -> Option<FlightEvent> {
        let uploaded_time = self.uploaded_time?;
        Some(FlightEvent {
            mode_s_code: self.mode_s_code.clone(),
            location: self.location.clone(),
            flight_number: self.flight_number.clone(),
            altitude: self.altitude,
            latitude: self.latitude,
            longitude: self.longitude,
            heading: self.heading,
            ascent_count: self.ascent_count,
            time_at_location: iso8601(self.time_at_location),
            uploaded_time: iso8601(uploaded_time),
        })
    }
}

/// One element of an upload batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlightEvent {
    /// Mode-S address.
    #[serde(rename = "ModeSCode")]
    pub mode_s_code: String,
    /// Receiver identifier.
    pub location: String,
    /// Flight number.
    pub flight_number: String,
    /// Altitude in feet.
    pub altitude: i64,
    /// Latitude, `null` when never fixed.
    pub latitude: Option<f64>,
    /// Longitude, `null` when never fixed.
    pub longitude: Option<f64>,
    /// Heading, `null` when never fixed.
    pub heading: Option<f64>,
    /// Net climbs minus descents.
    pub ascent_count: i32,
    /// ISO-8601 time at the reported position.
    pub time_at_location: String,
    /// ISO-8601 time of upload.
    pub uploaded_time: String,
}

/// Format a UTC timestamp the way the ingest side expects (`+00:00` offset).
fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}
