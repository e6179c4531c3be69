//! Feed fetching: transport sources, an optional TTL cache and the
//! [`FeedClient`] that turns raw bodies into parsed feeds.

mod basic;
mod cache;
mod client;

pub use basic::{AutoSource, FileSource, HttpSource};
pub use cache::FeedCache;
pub use client::FeedSource;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::AgencyFeeds;
use crate::error::FetchError;
use crate::parser::{RealtimeFeed, parse_realtime};
use crate::schedule::StaticSchedule;

/// Fetches longer than this are logged as slow.
const SLOW_FETCH: Duration = Duration::from_secs(5);

/// Fetches and parses static and real-time feeds through a [`FeedSource`].
pub struct FeedClient<S> {
    source: S,
    timeout: Duration,
    cache: Option<Arc<FeedCache>>,
}

impl<S: FeedSource> FeedClient<S> {
    pub fn new(source: S, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            cache: None,
        }
    }

    /// Shares `cache` between this client and any other holder of the `Arc`.
    pub fn with_cache(mut self, cache: Arc<FeedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fetches raw bytes, bounded by the client timeout and served from the
    /// cache when one is configured.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Bytes, FetchError> {
        self.fetch_bytes_noting(url, &AtomicBool::new(false)).await
    }

    /// Like [`fetch_bytes`](Self::fetch_bytes), setting `upstream` when the
    /// body is fetched from the source rather than served from the cache.
    #[tracing::instrument(skip(self, upstream))]
    async fn fetch_bytes_noting(
        &self,
        url: &str,
        upstream: &AtomicBool,
    ) -> Result<Bytes, FetchError> {
        let fetch = || {
            upstream.store(true, Ordering::Relaxed);
            self.fetch_upstream(url)
        };
        match &self.cache {
            Some(cache) => cache.get_or_fetch(url, fetch).await,
            None => fetch().await,
        }
    }

    async fn fetch_upstream(&self, url: &str) -> Result<Bytes, FetchError> {
        let start = Instant::now();
        let body = tokio::time::timeout(self.timeout, self.source.get(url))
            .await
            .map_err(|_| {
                FetchError::timeout(url, format!("no response within {:?}", self.timeout))
            })??;

        let elapsed = start.elapsed();
        if elapsed > SLOW_FETCH {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "Feed fetch was slow");
        }
        debug!(bytes = body.len(), "Feed bytes received");
        Ok(body)
    }

    pub async fn fetch_static(&self, url: &str) -> Result<StaticSchedule, FetchError> {
        self.fetch_static_noting(url, &AtomicBool::new(false)).await
    }

    async fn fetch_static_noting(
        &self,
        url: &str,
        upstream: &AtomicBool,
    ) -> Result<StaticSchedule, FetchError> {
        let bytes = self.fetch_bytes_noting(url, upstream).await?;
        StaticSchedule::from_zip_bytes(&bytes).map_err(|e| FetchError::malformed(url, e.to_string()))
    }

    pub async fn fetch_realtime(&self, url: &str) -> Result<RealtimeFeed, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        let feed = parse_realtime(&bytes).map_err(|e| FetchError::malformed(url, e.to_string()))?;
        debug!(trips = feed.updates.len(), "Real-time feed parsed");
        Ok(feed)
    }

    /// Fetches both feeds of an agency concurrently.
    ///
    /// If the real-time half fails, or the returned future is dropped before
    /// both halves finish, a static body fetched upstream by this call is
    /// evicted from the cache. A body served from the cache is left alone.
    pub async fn fetch_both(
        &self,
        feeds: &AgencyFeeds,
    ) -> (
        Result<StaticSchedule, FetchError>,
        Result<RealtimeFeed, FetchError>,
    ) {
        let upstream = AtomicBool::new(false);
        let mut guard = EvictOnDrop {
            cache: self.cache.as_deref(),
            url: &feeds.static_url,
            upstream: &upstream,
            armed: true,
        };

        let (schedule, realtime) = tokio::join!(
            self.fetch_static_noting(&feeds.static_url, &upstream),
            self.fetch_realtime(&feeds.realtime_url)
        );

        guard.armed = realtime.is_err();
        (schedule, realtime)
    }
}

struct EvictOnDrop<'a> {
    cache: Option<&'a FeedCache>,
    url: &'a str,
    upstream: &'a AtomicBool,
    armed: bool,
}

impl Drop for EvictOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed || !self.upstream.load(Ordering::Relaxed) {
            return;
        }
        if let Some(cache) = self.cache {
            cache.invalidate(self.url);
        }
    }
}
