//! Error types shared across the fetch → correlate → format → dispatch pipeline.

use std::fmt;

use thiserror::Error;

/// Why a feed fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Transport error or non-2xx HTTP status.
    NetworkFailure,
    /// The fetch exceeded its configured timeout.
    Timeout,
    /// The body arrived but could not be parsed as the expected feed format.
    MalformedFeed,
}

impl FetchErrorKind {
    /// Timeouts are reported to users as network failures.
    pub fn reported(self) -> Self {
        match self {
            FetchErrorKind::Timeout => FetchErrorKind::NetworkFailure,
            other => other,
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchErrorKind::NetworkFailure => "NetworkFailure",
            FetchErrorKind::Timeout => "Timeout",
            FetchErrorKind::MalformedFeed => "MalformedFeed",
        };
        f.write_str(name)
    }
}

/// A failed fetch of one feed URL.
#[derive(Debug, Clone, Error)]
#[error("{kind} fetching {url}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, url: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn network(url: &str, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NetworkFailure, url, message)
    }

    pub fn timeout(url: &str, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, url, message)
    }

    pub fn malformed(url: &str, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::MalformedFeed, url, message)
    }
}

/// Failure of the outbound send primitive for a single chunk.
#[derive(Debug, Clone, Error)]
#[error("send failed: {0}")]
pub struct SendError(pub String);

/// Terminal failure of one command invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Bad or missing arguments; carries the usage text shown to the user.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Chunk `index` (0-based) failed; `delivered` chunks went out before it.
    #[error("chunk {index} of {total} not delivered ({delivered} sent): {source}")]
    Send {
        index: usize,
        total: usize,
        delivered: usize,
        #[source]
        source: SendError,
    },

    /// The invoking context went away before the invocation finished.
    #[error("invocation cancelled")]
    Cancelled,
}
