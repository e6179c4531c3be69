use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::client::FeedSource;
use crate::error::FetchError;

/// Plain HTTP GET over a shared `reqwest` client.
pub struct HttpSource(reqwest::Client);

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;
        Ok(Self(client))
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::timeout(url, e.to_string())
    } else {
        FetchError::network(url, e.to_string())
    }
}

#[async_trait]
impl FeedSource for HttpSource {
    async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        let resp = self
            .0
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::network(url, format!("HTTP status {status}")));
        }

        resp.bytes().await.map_err(|e| transport_error(url, e))
    }
}

/// Reads feeds from local files, for offline runs against saved snapshots.
pub struct FileSource;

#[async_trait]
impl FeedSource for FileSource {
    async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| FetchError::network(url, e.to_string()))
    }
}

/// Uses HTTP for `http(s)://` URLs and the filesystem for everything else.
pub struct AutoSource {
    http: HttpSource,
}

impl AutoSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: HttpSource::new(timeout)?,
        })
    }
}

#[async_trait]
impl FeedSource for AutoSource {
    async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.get(url).await
        } else {
            FileSource.get(url).await
        }
    }
}
