//! Joins real-time trip updates against the static schedule.

use std::collections::HashMap;
use std::fmt;

use crate::parser::RealtimeTripUpdate;
use crate::schedule::StaticSchedule;

/// Where a trip's vehicle currently is.
///
/// `Unknown` means no position was reported, which is not the same thing as
/// a reported stop whose id happens to be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StopRef {
    Known(String),
    Unknown,
}

impl StopRef {
    pub fn as_known(&self) -> Option<&str> {
        match self {
            StopRef::Known(id) => Some(id),
            StopRef::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, StopRef::Known(_))
    }
}

impl From<Option<String>> for StopRef {
    fn from(stop: Option<String>) -> Self {
        stop.map_or(StopRef::Unknown, StopRef::Known)
    }
}

impl fmt::Display for StopRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopRef::Known(id) => f.write_str(id),
            StopRef::Unknown => f.write_str("unknown"),
        }
    }
}

/// One real-time trip with its resolved stop and route context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedLocation {
    pub trip_id: String,
    pub stop: StopRef,
    pub route_id: Option<String>,
    /// Human-readable stop name from `stops.txt`.
    pub stop_name: Option<String>,
    /// Route short/long name from `routes.txt`.
    pub route_name: Option<String>,
}

/// Produces exactly one [`CorrelatedLocation`] per update, in input order.
///
/// Route ids come from the schedule's `trips.txt` when the trip is listed
/// there, otherwise from the update's own trip descriptor. A trip missing
/// from the schedule is not an error.
pub fn correlate(
    schedule: Option<&StaticSchedule>,
    updates: &[RealtimeTripUpdate],
) -> Vec<CorrelatedLocation> {
    updates
        .iter()
        .map(|u| {
            let stop = StopRef::from(u.stop_id.clone());

            let route_id = schedule
                .and_then(|s| s.trip(&u.trip_id))
                .map(|t| t.route_id.clone())
                .or_else(|| u.route_id.clone());

            let route_name = schedule
                .zip(route_id.as_deref())
                .and_then(|(s, r)| s.route(r))
                .map(|r| r.display_name().to_string());

            let stop_name = schedule
                .zip(stop.as_known())
                .and_then(|(s, id)| s.stop(id))
                .and_then(|s| s.stop_name.clone())
                .filter(|n| !n.is_empty());

            CorrelatedLocation {
                trip_id: u.trip_id.clone(),
                stop,
                route_id,
                stop_name,
                route_name,
            }
        })
        .collect()
}

/// Collapses repeated trip ids, keeping the latest record for each trip in
/// the position where the trip was first seen.
pub fn dedupe_latest(locations: Vec<CorrelatedLocation>) -> Vec<CorrelatedLocation> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<CorrelatedLocation> = Vec::with_capacity(locations.len());

    for loc in locations {
        match index.get(&loc.trip_id) {
            Some(&i) => out[i] = loc,
            None => {
                index.insert(loc.trip_id.clone(), out.len());
                out.push(loc);
            }
        }
    }

    out
}
