//! Protobuf parser for GTFS Realtime feeds.
//!
//! Decodes a [`FeedMessage`] and flattens its trip-update entities into
//! [`RealtimeTripUpdate`]s, folding in the stop each trip's vehicle last
//! reported.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use prost::Message;
use tracing::debug;

use crate::gtfs_rt::trip_descriptor::ScheduleRelationship;
use crate::gtfs_rt::{FeedMessage, TripDescriptor};

/// One live trip from the real-time feed.
///
/// `stop_id` is `None` when no vehicle position was reported for the trip.
/// A position with an empty stop code stays `Some("")`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealtimeTripUpdate {
    pub trip_id: String,
    pub stop_id: Option<String>,
    pub on_trip: Option<bool>,
    /// Route id carried on the trip descriptor, if the producer set one.
    pub route_id: Option<String>,
}

impl RealtimeTripUpdate {
    pub fn new(trip_id: impl Into<String>) -> Self {
        Self {
            trip_id: trip_id.into(),
            ..Default::default()
        }
    }

    pub fn at_stop(mut self, stop_id: impl Into<String>) -> Self {
        self.stop_id = Some(stop_id.into());
        self
    }

    pub fn with_on_trip(mut self, on_trip: bool) -> Self {
        self.on_trip = Some(on_trip);
        self
    }

    pub fn with_route(mut self, route_id: impl Into<String>) -> Self {
        self.route_id = Some(route_id.into());
        self
    }
}

/// The decoded real-time feed: header timestamp plus trip updates in entity order.
#[derive(Debug, Clone, Default)]
pub struct RealtimeFeed {
    pub timestamp: Option<DateTime<Utc>>,
    pub updates: Vec<RealtimeTripUpdate>,
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, prost::DecodeError> {
    FeedMessage::decode(bytes)
}

/// Decodes raw bytes straight into a [`RealtimeFeed`].
pub fn parse_realtime(bytes: &[u8]) -> Result<RealtimeFeed, prost::DecodeError> {
    let feed = parse_feed(bytes)?;
    Ok(RealtimeFeed {
        timestamp: feed
            .header
            .timestamp
            .and_then(|ts| i64::try_from(ts).ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        updates: trip_updates(&feed),
    })
}

/// Extracts one [`RealtimeTripUpdate`] per trip-update entity that names a trip.
pub fn trip_updates(feed: &FeedMessage) -> Vec<RealtimeTripUpdate> {
    // First vehicle position reported for each trip.
    let mut vehicle_stops: HashMap<&str, Option<&str>> = HashMap::new();
    for e in &feed.entity {
        let Some(v) = &e.vehicle else { continue };
        let Some(trip_id) = v.trip.as_ref().and_then(trip_id_of) else {
            continue;
        };
        // An empty stop id is still a reported position.
        vehicle_stops.entry(trip_id).or_insert(v.stop_id.as_deref());
    }

    let mut updates = Vec::new();
    let mut skipped = 0usize;

    for e in &feed.entity {
        if e.is_deleted == Some(true) {
            continue;
        }
        let Some(tu) = &e.trip_update else { continue };
        let Some(trip_id) = trip_id_of(&tu.trip) else {
            skipped += 1;
            continue;
        };

        let position = vehicle_stops.get(trip_id);
        let on_trip = if tu.trip.schedule_relationship() == ScheduleRelationship::Canceled {
            Some(false)
        } else if tu.vehicle.is_some() || position.is_some() {
            Some(true)
        } else {
            None
        };

        updates.push(RealtimeTripUpdate {
            trip_id: trip_id.to_string(),
            stop_id: position.copied().flatten().map(str::to_string),
            on_trip,
            route_id: tu
                .trip
                .route_id
                .as_deref()
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        });
    }

    if skipped > 0 {
        debug!(skipped, "Trip updates without a trip_id skipped");
    }

    updates
}

fn trip_id_of(trip: &TripDescriptor) -> Option<&str> {
    trip.trip_id.as_deref().filter(|id| !id.is_empty())
}
