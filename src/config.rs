//! Runtime configuration, built once at startup and shared read-only.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::output::DEFAULT_MAX_CHUNK_SIZE;

pub const DEFAULT_AGENCY_ID: &str = "bart";
pub const DEFAULT_STATIC_URL: &str = "https://www.bart.gov/dev/schedules/google_transit.zip";
pub const DEFAULT_REALTIME_URL: &str = "http://api.bart.gov/gtfsrt/tripupdate.aspx";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Feed endpoints for one agency.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgencyFeeds {
    pub static_url: String,
    pub realtime_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Agency id → feed endpoints. Ordered so listings are stable.
    pub agencies: BTreeMap<String, AgencyFeeds>,
    pub fetch_timeout: Duration,
    pub max_chunk_size: usize,
    /// `None` disables the feed cache.
    pub cache_ttl: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        let mut agencies = BTreeMap::new();
        agencies.insert(
            DEFAULT_AGENCY_ID.to_string(),
            AgencyFeeds {
                static_url: DEFAULT_STATIC_URL.to_string(),
                realtime_url: DEFAULT_REALTIME_URL.to_string(),
            },
        );
        Self {
            agencies,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            cache_ttl: None,
        }
    }
}

impl Config {
    /// Builds a config from the process environment.
    ///
    /// `AGENCIES_FILE` points at a JSON agency table; without it a single
    /// agency is taken from `AGENCY_ID`, `STATIC_FEED_URL` and
    /// `REALTIME_FEED_URL`. `FETCH_TIMEOUT_SECS`, `MAX_CHUNK_SIZE` and
    /// `CACHE_TTL_SECS` tune the pipeline.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = lookup("AGENCIES_FILE") {
            config.agencies = load_agencies(&path)?;
        } else {
            let id = lookup("AGENCY_ID").unwrap_or_else(|| DEFAULT_AGENCY_ID.to_string());
            config.agencies = BTreeMap::from([(
                id,
                AgencyFeeds {
                    static_url: lookup("STATIC_FEED_URL")
                        .unwrap_or_else(|| DEFAULT_STATIC_URL.to_string()),
                    realtime_url: lookup("REALTIME_FEED_URL")
                        .unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string()),
                },
            )]);
        }

        if let Some(secs) = lookup("FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = Duration::from_secs(parse_num(&secs, "FETCH_TIMEOUT_SECS")?);
        }
        if let Some(size) = lookup("MAX_CHUNK_SIZE") {
            config.max_chunk_size = parse_num::<usize>(&size, "MAX_CHUNK_SIZE")?;
        }
        if let Some(secs) = lookup("CACHE_TTL_SECS") {
            config.cache_ttl = ttl_from_secs(parse_num(&secs, "CACHE_TTL_SECS")?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.agencies.is_empty(), "no agencies configured");
        anyhow::ensure!(self.max_chunk_size >= 1, "max chunk size must be at least 1");
        anyhow::ensure!(
            !self.fetch_timeout.is_zero(),
            "fetch timeout must be greater than zero"
        );
        Ok(())
    }

    pub fn agency(&self, agency_id: &str) -> Option<&AgencyFeeds> {
        self.agencies.get(agency_id)
    }
}

/// A TTL of zero seconds disables caching.
pub fn ttl_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Loads an agency table from a JSON file:
///
/// ```json
/// {
///   "bart": {
///     "static_url": "https://www.bart.gov/dev/schedules/google_transit.zip",
///     "realtime_url": "http://api.bart.gov/gtfsrt/tripupdate.aspx"
///   }
/// }
/// ```
pub fn load_agencies(path: &str) -> Result<BTreeMap<String, AgencyFeeds>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading agency file '{path}'"))?;
    parse_agencies(&content).with_context(|| format!("parsing agency file '{path}'"))
}

pub fn parse_agencies(json: &str) -> Result<BTreeMap<String, AgencyFeeds>> {
    Ok(serde_json::from_str(json)?)
}

fn parse_num<T: std::str::FromStr>(value: &str, key: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a number, got '{value}'"))
}
