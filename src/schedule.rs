//! GTFS static schedule loading.
//!
//! Reads `routes.txt`, `trips.txt` and (optionally) `stops.txt` out of a GTFS
//! zip archive into lookup tables keyed by id. Only the columns the reports
//! use are kept; everything else in the archive is ignored.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

/// Errors raised while loading a GTFS archive.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("not a readable zip archive: {0}")]
    Archive(#[from] ZipError),

    #[error("archive is missing {0}")]
    MissingFile(&'static str),

    #[error("failed to read {file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    pub route_id: String,
    #[serde(default)]
    pub route_short_name: Option<String>,
    #[serde(default)]
    pub route_long_name: Option<String>,
}

impl Route {
    /// Short name if present, falling back to the long name and then the id.
    pub fn display_name(&self) -> &str {
        self.route_short_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.route_long_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.route_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trip {
    pub trip_id: String,
    pub route_id: String,
    #[serde(default)]
    pub trip_headsign: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: Option<String>,
}

/// Immutable snapshot of one agency's routes, trips and stops.
#[derive(Debug, Clone, Default)]
pub struct StaticSchedule {
    routes: HashMap<String, Route>,
    trips: HashMap<String, Trip>,
    stops: HashMap<String, Stop>,
}

impl StaticSchedule {
    /// Parses a GTFS zip archive held in memory.
    pub fn from_zip_bytes(bytes: &[u8]) -> Result<Self, ScheduleError> {
        Self::from_archive(ZipArchive::new(Cursor::new(bytes))?)
    }

    pub fn from_archive<R: Read + Seek>(mut archive: ZipArchive<R>) -> Result<Self, ScheduleError> {
        let routes: Vec<Route> = read_table(&mut archive, "routes.txt")?
            .ok_or(ScheduleError::MissingFile("routes.txt"))?;
        let trips: Vec<Trip> = read_table(&mut archive, "trips.txt")?
            .ok_or(ScheduleError::MissingFile("trips.txt"))?;
        let stops: Vec<Stop> = read_table(&mut archive, "stops.txt")?.unwrap_or_default();

        debug!(
            routes = routes.len(),
            trips = trips.len(),
            stops = stops.len(),
            "Static schedule parsed"
        );

        Ok(Self::from_parts(routes, trips, stops))
    }

    pub fn from_parts(routes: Vec<Route>, trips: Vec<Trip>, stops: Vec<Stop>) -> Self {
        Self {
            routes: routes.into_iter().map(|r| (r.route_id.clone(), r)).collect(),
            trips: trips.into_iter().map(|t| (t.trip_id.clone(), t)).collect(),
            stops: stops.into_iter().map(|s| (s.stop_id.clone(), s)).collect(),
        }
    }

    pub fn trip(&self, trip_id: &str) -> Option<&Trip> {
        self.trips.get(trip_id)
    }

    pub fn route(&self, route_id: &str) -> Option<&Route> {
        self.routes.get(route_id)
    }

    pub fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.get(stop_id)
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }
}

/// Deserializes one CSV member of the archive, or `None` if it is absent.
fn read_table<R, T>(archive: &mut ZipArchive<R>, name: &'static str) -> Result<Option<Vec<T>>, ScheduleError>
where
    R: Read + Seek,
    T: for<'de> Deserialize<'de>,
{
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result.map_err(|source| ScheduleError::Csv { file: name, source })?);
    }

    Ok(Some(rows))
}
