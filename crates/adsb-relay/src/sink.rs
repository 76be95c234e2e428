//! Upload sinks for finished flights.
//!
//! A sink receives one [`UploadBatch`] per cycle at most. It either accepts
//! the whole batch or fails it as a unit; the cycle processor rolls back the
//! batch's records on failure so they are offered again next cycle.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::flight::FlightEvent;

/// Content type of an upload body.
pub const BATCH_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Maximum number of response body bytes quoted in an upload error.
const ERROR_BODY_EXCERPT: usize = 256;

/// The flights that disappeared in one cycle, serialized as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UploadBatch {
    events: Vec<FlightEvent>,
}

impl UploadBatch {
    /// Create a batch from events.
    #[must_use]
    pub fn new(events: Vec<FlightEvent>) -> Self {
        Self { events }
    }

    /// Add an event to the batch.
    pub fn push(&mut self, event: FlightEvent) {
        self.events.push(event);
    }

    /// The events in this batch.
    #[must_use]
    pub fn events(&self) -> &[FlightEvent] {
        &self.events
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Serialize the batch as a UTF-8 JSON array.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.events)?)
    }
}

/// A destination for upload batches.
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Name of this sink (for logging).
    fn name(&self) -> &'static str;

    /// Deliver a batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upload`] if the batch was not delivered.
    async fn send(&self, batch: &UploadBatch) -> Result<()>;
}

/// Sink that POSTs each batch to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpUploadSink {
    endpoint: String,
    credential: Option<String>,
    client: reqwest::Client,
}

impl HttpUploadSink {
    /// Create a sink for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        credential: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build upload client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            credential,
            client,
        })
    }

    /// The endpoint batches are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UploadSink for HttpUploadSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, batch: &UploadBatch) -> Result<()> {
        let body = batch.to_json()?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, BATCH_CONTENT_TYPE)
            .body(body);
        if let Some(credential) = &self.credential {
            request = request.header(AUTHORIZATION, credential);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::upload(batch.len(), format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(batch_len = batch.len(), %status, "Batch accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
        Err(Error::upload(
            batch.len(),
            format!("endpoint answered {status}: {excerpt}"),
        ))
    }
}

/// Sink that only logs batches; used for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl UploadSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, batch: &UploadBatch) -> Result<()> {
        for event in batch.events() {
            info!(
                mode_s_code = %event.mode_s_code,
                flight_number = %event.flight_number,
                altitude = event.altitude,
                ascent_count = event.ascent_count,
                time_at_location = %event.time_at_location,
                "Flight complete (dry run)"
            );
        }
        Ok(())
    }
}
