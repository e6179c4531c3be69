use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;

/// Returns the raw body stored at `url`.
///
/// Implementations report transport problems and non-success statuses as
/// [`FetchErrorKind::NetworkFailure`](crate::error::FetchErrorKind) and
/// their own timeouts as `Timeout`.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes, FetchError>;
}

#[async_trait]
impl<S: FeedSource + ?Sized> FeedSource for std::sync::Arc<S> {
    async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        (**self).get(url).await
    }
}
