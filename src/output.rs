//! Report rendering and size-bounded chunking.
//!
//! Records are rendered to text and packed greedily into chunks no longer
//! than a configured byte bound. A record is never split: one that is larger
//! than the bound on its own is emitted as a single oversized chunk.

use chrono::{DateTime, Utc};

use crate::correlate::{CorrelatedLocation, StopRef};
use crate::stats::TripStats;

/// Default chunk bound, leaving headroom under common 2000-character message limits.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1900;

/// Packs rendered records into chunks of at most `max_chunk_size` bytes.
///
/// Concatenating the returned chunks reproduces the concatenation of the
/// rendered records. An empty input yields no chunks.
pub fn format_chunks<R, F>(records: &[R], render: F, max_chunk_size: usize) -> Vec<String>
where
    F: Fn(&R) -> String,
{
    pack(records.iter().map(render), max_chunk_size)
}

/// Like [`format_chunks`], with `header` packed as the first atomic record.
///
/// Returns no chunks when `records` is empty so the caller can pick its own
/// "nothing to report" message.
pub fn format_chunks_with_header<R, F>(
    header: &str,
    records: &[R],
    render: F,
    max_chunk_size: usize,
) -> Vec<String>
where
    F: Fn(&R) -> String,
{
    if records.is_empty() {
        return Vec::new();
    }
    pack(
        std::iter::once(header.to_string()).chain(records.iter().map(render)),
        max_chunk_size,
    )
}

fn pack(rendered: impl Iterator<Item = String>, max_chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();

    for piece in rendered {
        if !buf.is_empty() && buf.len() + piece.len() > max_chunk_size {
            chunks.push(std::mem::take(&mut buf));
        }
        buf.push_str(&piece);
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    chunks
}

/// One report line for a trip's current location.
pub fn render_location(loc: &CorrelatedLocation) -> String {
    let train = match &loc.route_name {
        Some(route) => format!("Train {} ({})", loc.trip_id, route),
        None => format!("Train {}", loc.trip_id),
    };

    match (&loc.stop, &loc.stop_name) {
        (StopRef::Known(id), Some(name)) => {
            format!("{train} is currently at stop {id} ({name})\n")
        }
        (StopRef::Known(id), None) => format!("{train} is currently at stop {id}\n"),
        (StopRef::Unknown, _) => format!("{train} has not reported its position\n"),
    }
}

pub fn locations_header(agency_id: &str, as_of: Option<DateTime<Utc>>) -> String {
    match as_of {
        Some(ts) => format!(
            "Current train locations for agency {agency_id} (as of {} UTC):\n",
            ts.format("%Y-%m-%d %H:%M:%S")
        ),
        None => format!("Current train locations for agency {agency_id}:\n"),
    }
}

/// Single-message summary for the trip count command.
pub fn render_trip_count(agency_id: &str, stats: &TripStats) -> String {
    let mut out = format!("The current number of trains for {agency_id}:\n");
    if stats.on_trip == 1 {
        out.push_str(&format!(
            "There is 1 train currently on a trip ({} in the feed).",
            count_of(stats.total_trips, "trip")
        ));
    } else if stats.on_trip > 1 {
        out.push_str(&format!(
            "There are {} trains currently on trips ({} in the feed).",
            stats.on_trip,
            count_of(stats.total_trips, "trip")
        ));
    } else {
        out.push_str(&format!("No trains for {agency_id} are currently on a trip."));
    }
    out
}

fn count_of(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

pub fn no_records_message(agency_id: &str) -> String {
    format!("No trips are running for agency {agency_id} right now.")
}
