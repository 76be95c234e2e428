//! Snapshot sources.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{Error, Result};
use crate::observation::Snapshot;

/// Something that can produce the current receiver snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] when the receiver cannot be read, and
    /// [`Error::MalformedSnapshot`] when its answer is not a usable snapshot.
    async fn fetch(&self) -> Result<Snapshot>;
}

/// Reads `aircraft.json` from a dump1090/readsb web server.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    url: String,
    client: reqwest::Client,
}

impl HttpSnapshotSource {
    /// Create a source for the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build receiver client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// The URL snapshots are read from.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<Snapshot> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::fetch(&self.url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(&self.url, format!("receiver answered {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(&self.url, format!("failed reading body: {e}")))?;
        trace!(bytes = body.len(), "Fetched snapshot");

        Snapshot::from_slice(&body)
    }
}
