//! Receiver snapshot and per-aircraft observation types.
//!
//! A snapshot is the `aircraft.json` document served by dump1090/readsb style
//! decoders: a capture time plus one record per aircraft currently in view.
//! Records are validated one by one; a record missing its identifier, flight
//! number or age is dropped without failing the snapshot.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Altitude as reported by the decoder.
///
/// Decoders emit feet as a number, or the literal `"ground"` for aircraft on
/// the surface.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AltitudeReading {
    /// Whole feet.
    Feet(i64),
    /// Fractional feet (some decoders emit floats).
    FractionalFeet(f64),
    /// Textual value such as `"ground"` or `""`.
    Text(String),
}

impl AltitudeReading {
    /// Resolve to feet, where 0 means no usable reading.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn feet(&self) -> i64 {
        match self {
            Self::Feet(feet) => *feet,
            Self::FractionalFeet(feet) if feet.is_finite() => feet.round() as i64,
            Self::FractionalFeet(_) | Self::Text(_) => 0,
        }
    }
}

/// One aircraft record exactly as it appears in the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawObservation {
    /// Mode-S transponder address (hex).
    pub hex: Option<String>,
    /// Callsign / flight number.
    pub flight: Option<String>,
    /// Seconds since the decoder last heard from this aircraft.
    pub seen: Option<f64>,
    /// Barometric altitude.
    pub alt_baro: Option<AltitudeReading>,
    /// Geometric (GNSS) altitude.
    pub alt_geom: Option<AltitudeReading>,
    /// Latitude in degrees.
    pub lat: Option<f64>,
    /// Longitude in degrees.
    pub lon: Option<f64>,
    /// Track over ground in degrees.
    pub track: Option<f64>,
}

impl RawObservation {
    /// Resolve the altitude, preferring the barometric reading.
    ///
    /// When `alt_baro` is present it wins even if it reads `"ground"`.
    #[must_use]
    pub fn resolved_altitude(&self) -> i64 {
        self.alt_baro
            .as_ref()
            .or(self.alt_geom.as_ref())
            .map_or(0, AltitudeReading::feet)
    }
}

/// A complete position fix: latitude, longitude and heading together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionFix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Heading (track) in degrees.
    pub heading: f64,
}

/// A validated observation, ready for merging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Trimmed mode-S address.
    pub mode_s_code: String,
    /// Trimmed flight number.
    pub flight_number: String,
    /// Seconds since the aircraft was last heard.
    pub seen: f64,
    /// Resolved altitude in feet, 0 when unknown or on the ground.
    pub altitude: i64,
    /// Latitude in degrees.
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    pub longitude: Option<f64>,
    /// Track over ground in degrees.
    pub track: Option<f64>,
}

impl Observation {
    /// Validate a raw record.
    ///
    /// Returns `None` when `hex`, `flight` or `seen` is missing, when the
    /// address is blank, or when `seen` is negative or not finite.
    #[must_use]
    pub fn from_raw(raw: RawObservation) -> Option<Self> {
        let altitude = raw.resolved_altitude();
        let mode_s_code = raw.hex?.trim().to_string();
        let flight_number = raw.flight?.trim().to_string();
        let seen = raw.seen?;

        if mode_s_code.is_empty() || !seen.is_finite() || seen < 0.0 {
            return None;
        }

        Some(Self {
            mode_s_code,
            flight_number,
            seen,
            altitude,
            latitude: raw.lat,
            longitude: raw.lon,
            track: raw.track,
        })
    }

    /// The position fix carried by this observation, if it is complete.
    ///
    /// A fix is complete when latitude, longitude and track are all present
    /// and the altitude is non-zero.
    #[must_use]
    pub fn fix(&self) -> Option<PositionFix> {
        if self.altitude == 0 {
            return None;
        }
        Some(PositionFix {
            latitude: self.latitude?,
            longitude: self.longitude?,
            heading: self.track?,
        })
    }

    /// When the aircraft was actually heard, given the snapshot capture time.
    ///
    /// Falls back to `captured_at` when `seen` does not yield a
    /// representable time; [`Snapshot`] parsing drops such records.
    #[must_use]
    pub fn sighted_at(&self, captured_at: DateTime<Utc>) -> DateTime<Utc> {
        self.checked_sighted_at(captured_at).unwrap_or(captured_at)
    }

    /// Like [`Observation::sighted_at`], but `None` when the age is out of range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn checked_sighted_at(&self, captured_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let millis = (self.seen * 1000.0).round();
        if !millis.is_finite() || millis < 0.0 || millis >= i64::MAX as f64 {
            return None;
        }
        TimeDelta::try_milliseconds(millis as i64)
            .and_then(|age| captured_at.checked_sub_signed(age))
    }

    /// Whether the decoder's data for this aircraft is older than `max_age_secs`.
    #[must_use]
    pub fn is_stale(&self, max_age_secs: f64) -> bool {
        self.seen > max_age_secs
    }
}

/// One poll of the receiver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Capture time, truncated to whole seconds.
    pub captured_at: DateTime<Utc>,
    /// Valid observations, in feed order.
    pub observations: Vec<Observation>,
    /// Number of records dropped during validation.
    pub dropped: usize,
}

impl Snapshot {
    /// Create a snapshot from already validated observations.
    #[must_use]
    pub fn new(captured_at: DateTime<Utc>, observations: Vec<Observation>) -> Self {
        Self {
            captured_at,
            observations,
            dropped: 0,
        }
    }

    /// Parse a snapshot from the receiver's response body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSnapshot`] if the body is not JSON, or if
    /// `now` or `aircraft` is missing or of the wrong type.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| Error::malformed_snapshot(format!("body is not JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Parse a snapshot from an already decoded JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSnapshot`] if `now` or `aircraft` is missing
    /// or of the wrong type.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut document) = value else {
            return Err(Error::malformed_snapshot("document is not a JSON object"));
        };

        let now = document
            .get("now")
            .ok_or_else(|| Error::malformed_snapshot("missing field `now`"))?
            .as_f64()
            .ok_or_else(|| Error::malformed_snapshot("field `now` is not a number"))?;
        let captured_at = capture_time(now)?;

        let Some(aircraft) = document.remove("aircraft") else {
            return Err(Error::malformed_snapshot("missing field `aircraft`"));
        };
        let Value::Array(records) = aircraft else {
            return Err(Error::malformed_snapshot("field `aircraft` is not an array"));
        };

        let total = records.len();
        let observations: Vec<Observation> = records
            .into_iter()
            .filter_map(|record| match serde_json::from_value::<RawObservation>(record) {
                Ok(raw) => {
                    let observation = Observation::from_raw(raw)
                        .filter(|obs| obs.checked_sighted_at(captured_at).is_some());
                    if observation.is_none() {
                        trace!("Dropping aircraft record without usable hex, flight or seen");
                    }
                    observation
                }
                Err(e) => {
                    debug!(error = %e, "Dropping unreadable aircraft record");
                    None
                }
            })
            .collect();
        let dropped = total - observations.len();

        debug!(
            captured_at = %captured_at,
            valid = observations.len(),
            dropped,
            "Parsed snapshot"
        );

        Ok(Self {
            captured_at,
            observations,
            dropped,
        })
    }

    /// Number of valid observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Check if the snapshot carries no valid observations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Convert the feed's fractional epoch seconds into a whole-second timestamp.
#[allow(clippy::cast_possible_truncation)]
fn capture_time(now: f64) -> Result<DateTime<Utc>> {
    if !now.is_finite() {
        return Err(Error::malformed_snapshot("field `now` is not finite"));
    }
    DateTime::from_timestamp(now.floor() as i64, 0)
        .ok_or_else(|| Error::malformed_snapshot(format!("field `now` is out of range: {now}")))
}
