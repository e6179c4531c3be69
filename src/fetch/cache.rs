//! TTL cache for raw feed bodies, keyed by URL.
//!
//! Each key has its own async lock, held across check → fetch → store, so
//! concurrent requests for the same stale or missing URL wait for a single
//! upstream fetch instead of issuing one each. Failed fetches are never
//! stored.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::trace;

use crate::error::FetchError;

struct Entry {
    body: Bytes,
    fetched_at: Instant,
}

type Slot = Arc<tokio::sync::Mutex<Option<Entry>>>;

pub struct FeedCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl FeedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, url: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(url.to_string()).or_default().clone()
    }

    /// Returns the cached body for `url` if it is younger than the TTL,
    /// otherwise runs `fetch` and stores its successful result.
    pub async fn get_or_fetch<F, Fut>(&self, url: &str, fetch: F) -> Result<Bytes, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, FetchError>>,
    {
        let slot = self.slot(url);
        let mut entry = slot.lock().await;

        if let Some(e) = entry.as_ref() {
            if e.fetched_at.elapsed() < self.ttl {
                trace!(url, "Feed cache hit");
                return Ok(e.body.clone());
            }
        }

        trace!(url, "Feed cache miss");
        // Stale data is dropped before fetching so a failure leaves nothing behind.
        *entry = None;
        let body = fetch().await?;
        *entry = Some(Entry {
            body: body.clone(),
            fetched_at: Instant::now(),
        });
        Ok(body)
    }

    /// Forgets `url`. An in-flight fetch for it completes but is not
    /// visible to later callers.
    pub fn invalidate(&self, url: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn counted(calls: &AtomicUsize, body: &'static str) -> Result<Bytes, FetchError> {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Bytes::from_static(body.as_bytes()))
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let cache = FeedCache::new(Duration::from_secs(30));
        let calls = AtomicUsize::new(0);

        let a = cache.get_or_fetch("u", || counted(&calls, "one")).await.unwrap();
        let b = cache.get_or_fetch("u", || counted(&calls, "two")).await.unwrap();

        assert_eq!(a, "one");
        assert_eq!(b, "one");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let cache = FeedCache::new(Duration::from_millis(10));
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch("u", || counted(&calls, "one")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let b = cache.get_or_fetch("u", || counted(&calls, "two")).await.unwrap();

        assert_eq!(b, "two");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let cache = Arc::new(FeedCache::new(Duration::from_secs(30)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = vec![];
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("u", || counted(&calls, "body"))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), "body");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let cache = FeedCache::new(Duration::from_secs(30));
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch("a", || counted(&calls, "a")).await.unwrap();
        let b = cache.get_or_fetch("b", || counted(&calls, "b")).await.unwrap();

        assert_eq!(b, "b");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = FeedCache::new(Duration::from_secs(30));

        let err = cache
            .get_or_fetch("u", || async { Err(FetchError::network("u", "down")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::NetworkFailure);

        let calls = AtomicUsize::new(0);
        let body = cache.get_or_fetch("u", || counted(&calls, "up")).await.unwrap();
        assert_eq!(body, "up");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = FeedCache::new(Duration::from_secs(30));
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch("u", || counted(&calls, "one")).await.unwrap();
        cache.invalidate("u");
        let b = cache.get_or_fetch("u", || counted(&calls, "two")).await.unwrap();

        assert_eq!(b, "two");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
