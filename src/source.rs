use std::{fmt, io, path::PathBuf, str::FromStr, time::Duration};

use futures::TryStreamExt;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::io::StreamReader;
use tracing::info;
use url::Url;

use crate::error::FeedError;

/// A reader over the raw feed.
pub type FeedReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Where the raw feed comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    Remote(Url),
}

impl FromStr for Source {
    type Err = url::ParseError;

    /// Anything starting with `http://` or `https://` is fetched, everything
    /// else is treated as a local path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("http://") || s.starts_with("https://") {
            Ok(Source::Remote(s.parse()?))
        } else {
            Ok(Source::File(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File(path) => write!(f, "{}", path.display()),
            Source::Remote(url) => write!(f, "{}", url),
        }
    }
}

impl Source {
    /// Open the feed for reading.
    ///
    /// Remote bodies are streamed rather than downloaded up front. Only a
    /// success status is accepted. `timeout` bounds the whole request and is
    /// ignored for local files.
    pub async fn open(&self, timeout: Option<Duration>) -> Result<FeedReader, FeedError> {
        match self {
            Source::File(path) => {
                info!("Loading events from file: {}", path.display());

                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|source| FeedError::Open {
                        path: path.display().to_string(),
                        source,
                    })?;

                Ok(Box::new(BufReader::new(file)))
            }
            Source::Remote(url) => {
                info!("Loading events from URL: {}", url);

                let request_error = |source: reqwest::Error| FeedError::Request {
                    url: url.to_string(),
                    source,
                };

                let mut builder = reqwest::Client::builder();
                if let Some(timeout) = timeout {
                    builder = builder.timeout(timeout);
                }
                let client = builder.build().map_err(request_error)?;

                let response = client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(request_error)?;

                let status = response.status();
                if !status.is_success() {
                    return Err(FeedError::Status {
                        url: url.to_string(),
                        status,
                    });
                }

                let body = Box::pin(
                    response
                        .bytes_stream()
                        .map_err(|err| io::Error::new(io::ErrorKind::Other, err)),
                );

                Ok(Box::new(StreamReader::new(body)))
            }
        }
    }
}
