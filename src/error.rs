use std::io;

use thiserror::Error;

/// Failures that end an event feed early.
///
/// Problems with individual fields never show up here: a bad timestamp or an
/// unknown timezone only leaves the affected field unset.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("unable to open {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("request for {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("bad GET status for {url}: {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("error reading feed: {0}")]
    Read(#[from] io::Error),

    #[error("event producer stopped: {0}")]
    Producer(#[from] tokio::task::JoinError),
}

impl FeedError {
    /// Whether the feed could not be acquired at all, as opposed to failing
    /// part way through.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(
            self,
            FeedError::Open { .. } | FeedError::Request { .. } | FeedError::Status { .. }
        )
    }
}
