use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status { url: Url, status: StatusCode },
    #[error("invalid response body from {url}: {message}")]
    Body { url: Url, message: String },
}

/// One-shot access to the server's log state.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Full current log text.
    async fn fetch_snapshot(&self) -> Result<String, SnapshotError>;

    /// Truncate the server log; returns the server's JSON acknowledgement.
    async fn clear(&self) -> Result<Value, SnapshotError>;
}

pub struct HttpLogSource {
    client: Client,
    snapshot_url: Url,
    clear_url: Url,
}

impl HttpLogSource {
    pub fn new(snapshot_url: Url, clear_url: Url) -> Self {
        Self {
            client: Client::new(),
            snapshot_url,
            clear_url,
        }
    }

    fn request_error(url: &Url) -> impl FnOnce(reqwest::Error) -> SnapshotError + '_ {
        move |source| SnapshotError::Request {
            url: url.clone(),
            source,
        }
    }
}

#[async_trait]
impl LogSource for HttpLogSource {
    async fn fetch_snapshot(&self) -> Result<String, SnapshotError> {
        let url = &self.snapshot_url;
        let response = self
            .client
            .get(url.clone())
            .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(PRAGMA, "no-cache")
            .header(EXPIRES, "0")
            .send()
            .await
            .map_err(Self::request_error(url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::Status {
                url: url.clone(),
                status,
            });
        }
        let text = response.text().await.map_err(Self::request_error(url))?;
        debug!(target: "beach_tide::snapshot", %url, bytes = text.len(), "fetched log snapshot");
        Ok(text)
    }

    async fn clear(&self) -> Result<Value, SnapshotError> {
        let url = &self.clear_url;
        let response = self
            .client
            .post(url.clone())
            .send()
            .await
            .map_err(Self::request_error(url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::Status {
                url: url.clone(),
                status,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| SnapshotError::Body {
                url: url.clone(),
                message: err.to_string(),
            })
    }
}
