//! Delivery of payloads to the ingestion endpoint

use crate::{Result, TelemetryError};
use apex_core::models::Payload;
use async_trait::async_trait;
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;

/// Upper bound on one delivery attempt
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-attempt payload delivery
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: &str, token: &str, payload: &Payload) -> Result<()>;
}

/// JSON-over-HTTPS transport with bearer authorization
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_timeout(SEND_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(concat!("apex-telemetry/", env!("CARGO_PKG_VERSION"))),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| TelemetryError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &str, token: &str, payload: &Payload) -> Result<()> {
        debug!(endpoint, trace_id = %payload.trace_id, "Posting telemetry payload");

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TelemetryError::Rejected {
                status_code: response.status().as_u16(),
            });
        }

        Ok(())
    }
}
