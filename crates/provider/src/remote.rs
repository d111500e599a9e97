//! HTTP client for the remote GPU fleet broker.
//!
//! Wraps the broker's generation API (submit, status, cancel) using
//! [`reqwest`]. Every request carries the configured timeout, so a
//! dead broker surfaces as [`ProviderError::Unreachable`] within a
//! bounded interval rather than stalling the coordinator.

use async_trait::async_trait;
use mirage_core::{GenerationParams, JobKind};
use serde::Deserialize;

use crate::{ComputeProvider, Dispatch, ProviderConfig, ProviderError, ProviderState, ProviderStatus};

/// HTTP client for a single fleet broker endpoint.
pub struct RemoteProvider {
    client: reqwest::Client,
    base_url: String,
}

/// Response from `POST /v1/generations`.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    /// Broker-assigned identifier for the queued generation.
    id: String,
    /// Broker's wall-clock estimate in seconds.
    estimated_secs: i64,
}

/// Response from `GET /v1/generations/{id}`.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    progress: i16,
    result: Option<serde_json::Value>,
    error: Option<String>,
    preview: Option<serde_json::Value>,
}

impl RemoteProvider {
    /// Create a client from provider configuration.
    pub fn new(config: &ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: config.base_url.clone(),
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or [`ProviderError::Api`] with
    /// the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn transport_error(e: reqwest::Error) -> ProviderError {
        ProviderError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl ComputeProvider for RemoteProvider {
    async fn submit(
        &self,
        kind: JobKind,
        params: &GenerationParams,
    ) -> Result<Dispatch, ProviderError> {
        let body = serde_json::json!({
            "kind": kind.code(),
            "params": params,
        });

        let response = self
            .client
            .post(format!("{}/v1/generations", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let response = Self::ensure_success(response).await?;
        let parsed: SubmitResponse = response.json().await.map_err(Self::transport_error)?;

        tracing::info!(
            kind = kind.code(),
            handle = %parsed.id,
            estimated_secs = parsed.estimated_secs,
            "Generation submitted to fleet broker",
        );

        Ok(Dispatch {
            handle: parsed.id,
            estimated_secs: parsed.estimated_secs,
        })
    }

    async fn poll(&self, handle: &str) -> Result<ProviderStatus, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/generations/{handle}", self.base_url))
            .send()
            .await
            .map_err(Self::transport_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::UnknownHandle(handle.to_string()));
        }

        let response = Self::ensure_success(response).await?;
        let parsed: StatusResponse = response.json().await.map_err(Self::transport_error)?;

        let state = match parsed.status.as_str() {
            "completed" => ProviderState::Completed,
            "failed" => ProviderState::Failed,
            // queued / running / anything in between counts as running.
            _ => ProviderState::Running,
        };

        Ok(ProviderStatus {
            state,
            progress: parsed.progress.clamp(0, 100),
            result: parsed.result,
            error: parsed.error,
            preview: parsed.preview,
        })
    }

    async fn cancel(&self, handle: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/generations/{handle}/cancel", self.base_url))
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}
