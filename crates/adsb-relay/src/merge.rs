//! Folding observations into flight state.
//!
//! Altitude samples are noisy, so a change only counts as a climb or descent
//! once it leaves a ±[`JITTER_BAND_FEET`] band around the previous reading.
//! The resulting trend decides which position fix is retained: a descending
//! or level aircraft keeps its earliest complete fix, a climbing one keeps
//! its latest.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::flight::FlightState;
use crate::observation::Observation;

/// Altitude change, in feet, tolerated before a trend change is recorded.
pub const JITTER_BAND_FEET: i64 = 25;

/// Fixed inputs of a merge that come from the cycle rather than the feed.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    /// Receiver identifier stamped on every record.
    pub location: &'a str,
    /// Snapshot capture time.
    pub captured_at: DateTime<Utc>,
}

/// Merge one observation into the prior state of its aircraft.
///
/// Returns the next state; `prior` is left untouched. A prior state that has
/// already been uploaded is returned unchanged.
#[must_use]
pub fn merge(
    prior: Option<&FlightState>,
    observation: &Observation,
    ctx: MergeContext<'_>,
) -> FlightState {
    let sighted_at = observation.sighted_at(ctx.captured_at);

    let mut next = match prior {
        Some(state) if state.is_uploaded() => {
            trace!(mode_s_code = %state.mode_s_code, "Not merging into uploaded flight");
            return state.clone();
        }
        Some(state) => state.clone(),
        None => FlightState::new(&observation.mode_s_code, ctx.location, sighted_at),
    };

    next.mode_s_code.clone_from(&observation.mode_s_code);
    next.location = ctx.location.to_string();
    next.flight_number.clone_from(&observation.flight_number);

    let fix = observation.fix();

    if next.altitude == 0 {
        // First usable reading: take whatever the observation offers.
        next.altitude = observation.altitude;
        match fix {
            Some(fix) => next.set_fix(fix, sighted_at),
            None if !next.has_fix() => next.time_at_location = sighted_at,
            None => {}
        }
        return next;
    }

    let step = altitude_step(next.altitude, observation.altitude);
    next.ascent_count = next.ascent_count.saturating_add(step);
    next.altitude = observation.altitude;

    let keep_latest = next.ascent_count > 0;
    match fix {
        Some(fix) if keep_latest || !next.has_fix() => next.set_fix(fix, sighted_at),
        None if !next.has_fix() => next.time_at_location = sighted_at,
        _ => {}
    }

    trace!(
        mode_s_code = %next.mode_s_code,
        altitude = next.altitude,
        ascent_count = next.ascent_count,
        trend = %next.trend(),
        "Merged observation"
    );
    next
}

/// Trend contribution of moving from `previous` to `current` feet.
#[must_use]
pub fn altitude_step(previous: i64, current: i64) -> i32 {
    if current < previous - JITTER_BAND_FEET {
        -1
    } else if current > previous + JITTER_BAND_FEET {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::Trend;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn ctx(now: i64) -> MergeContext<'static> {
        MergeContext {
            location: "rooftop",
            captured_at: at(now),
        }
    }

    fn observation(altitude: i64, fix: Option<(f64, f64, f64)>) -> Observation {
        Observation {
            mode_s_code: "A1B2C3".to_string(),
            flight_number: "UAL123".to_string(),
            seen: 1.0,
            altitude,
            latitude: fix.map(|f| f.0),
            longitude: fix.map(|f| f.1),
            track: fix.map(|f| f.2),
        }
    }

    /// Merge a sequence of observations into a fresh flight.
    fn fold(observations: &[Observation]) -> FlightState {
        let mut state: Option<FlightState> = None;
        for (i, obs) in observations.iter().enumerate() {
            let now = 1000 + 10 * i64::try_from(i).unwrap();
            state = Some(merge(state.as_ref(), obs, ctx(now)));
        }
        state.unwrap()
    }

    #[test]
    fn test_altitude_step_band() {
        assert_eq!(altitude_step(10000, 10025), 0);
        assert_eq!(altitude_step(10000, 9975), 0);
        assert_eq!(altitude_step(10000, 10026), 1);
        assert_eq!(altitude_step(10000, 9974), -1);
    }

    #[test]
    fn test_first_complete_observation_round_trips() {
        let state = merge(None, &observation(10000, Some((1.0, 2.0, 90.0))), ctx(1000));

        assert_eq!(state.mode_s_code, "A1B2C3");
        assert_eq!(state.location, "rooftop");
        assert_eq!(state.flight_number, "UAL123");
        assert_eq!(state.altitude, 10000);
        assert_eq!(state.latitude, Some(1.0));
        assert_eq!(state.longitude, Some(2.0));
        assert_eq!(state.heading, Some(90.0));
        assert_eq!(state.ascent_count, 0);
        assert_eq!(state.time_at_location, at(999));
        assert!(state.uploaded_time.is_none());
    }

    #[test]
    fn test_first_incomplete_observation_records_altitude_only() {
        let state = merge(None, &observation(8000, None), ctx(1000));
        assert_eq!(state.altitude, 8000);
        assert!(!state.has_fix());
        assert_eq!(state.time_at_location, at(999));
    }

    #[test]
    fn test_jitter_never_changes_trend() {
        let altitudes = [10000, 10020, 10040, 10015, 9995, 10010, 10030];
        let observations: Vec<_> = altitudes
            .iter()
            .map(|a| observation(*a, Some((1.0, 2.0, 90.0))))
            .collect();

        let state = fold(&observations);
        assert_eq!(state.ascent_count, 0);
        assert_eq!(state.altitude, 10030);
    }

    #[test]
    fn test_drop_then_rise_returns_to_level() {
        let state = fold(&[
            observation(10000, None),
            observation(9900, None),
            observation(10000, None),
        ]);
        assert_eq!(state.ascent_count, 0);
        assert_eq!(state.trend(), Trend::Level);

        let after_drop = fold(&[observation(10000, None), observation(9900, None)]);
        assert_eq!(after_drop.ascent_count, -1);
    }

    #[test]
    fn test_altitude_updated_even_when_fix_is_kept() {
        let state = fold(&[
            observation(10000, Some((1.0, 2.0, 90.0))),
            observation(9000, Some((3.0, 4.0, 91.0))),
        ]);
        assert_eq!(state.altitude, 9000);
        assert_eq!(state.latitude, Some(1.0));
    }

    #[test]
    fn test_descending_keeps_earliest_fix() {
        let state = fold(&[
            observation(10000, Some((1.0, 2.0, 90.0))),
            observation(9500, Some((1.5, 2.5, 95.0))),
            observation(9000, Some((2.0, 3.0, 100.0))),
        ]);
        assert_eq!(state.trend(), Trend::Descending);
        assert_eq!(state.latitude, Some(1.0));
        assert_eq!(state.heading, Some(90.0));
        assert_eq!(state.time_at_location, at(999));
    }

    #[test]
    fn test_descending_fills_missing_fix() {
        let state = fold(&[
            observation(10000, None),
            observation(9500, Some((1.5, 2.5, 95.0))),
            observation(9000, Some((2.0, 3.0, 100.0))),
        ]);
        assert_eq!(state.latitude, Some(1.5));
        assert_eq!(state.time_at_location, at(1009));
    }

    #[test]
    fn test_ascending_keeps_latest_fix() {
        let state = fold(&[
            observation(3000, Some((1.0, 2.0, 90.0))),
            observation(3500, Some((1.5, 2.5, 95.0))),
            observation(4000, Some((2.0, 3.0, 100.0))),
        ]);
        assert_eq!(state.trend(), Trend::Ascending);
        assert_eq!(state.ascent_count, 2);
        assert_eq!(state.latitude, Some(2.0));
        assert_eq!(state.heading, Some(100.0));
        assert_eq!(state.time_at_location, at(1019));
    }

    #[test]
    fn test_ascending_ignores_incomplete_fix() {
        let state = fold(&[
            observation(3000, Some((1.0, 2.0, 90.0))),
            observation(3500, Some((1.5, 2.5, 95.0))),
            observation(4000, None),
        ]);
        assert_eq!(state.latitude, Some(1.5));
        assert_eq!(state.time_at_location, at(1009));
    }

    #[test]
    fn test_flight_number_reassigned() {
        let first = merge(None, &observation(10000, None), ctx(1000));
        let mut renamed = observation(10000, None);
        renamed.flight_number = "UAL123A".to_string();

        let next = merge(Some(&first), &renamed, ctx(1010));
        assert_eq!(next.flight_number, "UAL123A");
        assert_eq!(first.flight_number, "UAL123");
    }

    #[test]
    fn test_ground_reading_restarts_first_observation() {
        let state = fold(&[
            observation(500, Some((1.0, 2.0, 90.0))),
            observation(0, Some((1.1, 2.1, 91.0))),
            observation(600, Some((1.2, 2.2, 92.0))),
        ]);
        // The ground reading counted as a descent, then reset the baseline.
        assert_eq!(state.ascent_count, -1);
        assert_eq!(state.altitude, 600);
        assert_eq!(state.latitude, Some(1.2));
    }

    #[test]
    fn test_uploaded_state_is_never_mutated() {
        let mut uploaded = merge(None, &observation(10000, Some((1.0, 2.0, 90.0))), ctx(1000));
        uploaded.uploaded_time = Some(at(1010));

        let next = merge(
            Some(&uploaded),
            &observation(12000, Some((5.0, 6.0, 180.0))),
            ctx(1020),
        );
        assert_eq!(next, uploaded);
    }
}
