// src/adapters/airbyte.rs

//! Extract-load through the Airbyte configuration API.
//!
//! A sync is started with `POST /api/v1/connections/sync` and then polled via
//! `POST /api/v1/jobs/get` until the job reaches a terminal status. The
//! watermark advanced on success is the run's logical timestamp: Airbyte
//! tracks its own cursor, the pipeline only records how far it has loaded.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{AdapterError, AdapterFuture, AttemptContext, SyncAdapter, SyncRequest, SyncResult};
use crate::state::WatermarkPosition;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    job: JobInfo,
    #[serde(default)]
    attempts: Vec<AttemptEnvelope>,
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    id: i64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct AttemptEnvelope {
    attempt: AttemptInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttemptInfo {
    #[serde(default)]
    records_synced: Option<u64>,
}

impl JobEnvelope {
    fn records_synced(&self) -> u64 {
        self.attempts
            .last()
            .and_then(|a| a.attempt.records_synced)
            .unwrap_or(0)
    }
}

/// Classify an HTTP status: auth and lookup failures are fatal, throttling
/// and server errors are retryable.
pub fn classify_status(status: StatusCode, body: &str) -> AdapterError {
    let message = format!("airbyte returned {status}: {body}");
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        AdapterError::retryable(message)
    } else {
        AdapterError::fatal(message)
    }
}

#[derive(Debug, Clone)]
pub struct AirbyteSyncAdapter {
    client: reqwest::Client,
    base_url: String,
    connection_id: String,
    api_token: Option<String>,
    poll_interval: Duration,
}

impl AirbyteSyncAdapter {
    pub fn new(
        base_url: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("eltflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdapterError::fatal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            connection_id: connection_id.into(),
            api_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<JobEnvelope, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::retryable(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<JobEnvelope>()
            .await
            .map_err(|e| AdapterError::retryable(format!("invalid response from {url}: {e}")))
    }

    async fn cancel_job(&self, job_id: i64) {
        match self.post("/api/v1/jobs/cancel", json!({ "id": job_id })).await {
            Ok(_) => info!(job_id, "cancelled airbyte job"),
            Err(e) => warn!(job_id, error = %e, "failed to cancel airbyte job"),
        }
    }

    async fn trigger_inner(
        &self,
        ctx: &AttemptContext,
        request: &SyncRequest,
    ) -> Result<SyncResult, AdapterError> {
        info!(
            task = %ctx.task,
            source = %request.source,
            connection_id = %self.connection_id,
            "triggering airbyte sync"
        );
        let started = self
            .post(
                "/api/v1/connections/sync",
                json!({ "connectionId": self.connection_id }),
            )
            .await?;
        let job_id = started.job.id;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = ctx.cancel.cancelled() => {
                    self.cancel_job(job_id).await;
                    return Err(AdapterError::retryable(format!("airbyte job {job_id} interrupted by cancellation")));
                }
            }

            let job = self.post("/api/v1/jobs/get", json!({ "id": job_id })).await?;
            debug!(job_id, status = %job.job.status, "polled airbyte job");

            match job.job.status.as_str() {
                "succeeded" => {
                    let rows = job.records_synced();
                    info!(job_id, rows, source = %request.source, "airbyte sync succeeded");
                    return Ok(SyncResult {
                        rows_synced: rows,
                        watermark_position: Some(WatermarkPosition::Timestamp(ctx.logical_ts)),
                    });
                }
                "failed" | "cancelled" => {
                    return Err(AdapterError::retryable(format!(
                        "airbyte job {job_id} finished with status {}",
                        job.job.status
                    )));
                }
                _ => {}
            }
        }
    }
}

impl SyncAdapter for AirbyteSyncAdapter {
    fn trigger<'a>(
        &'a self,
        ctx: &'a AttemptContext,
        request: &'a SyncRequest,
    ) -> AdapterFuture<'a, SyncResult> {
        Box::pin(self.trigger_inner(ctx, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").retryable);
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").retryable);
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").retryable);
    }

    #[test]
    fn client_errors_are_fatal() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN, StatusCode::NOT_FOUND] {
            let err = classify_status(status, "nope");
            assert!(!err.retryable, "{status}");
            assert!(err.message.contains("nope"));
        }
    }

    #[test]
    fn job_envelope_reads_records_from_last_attempt() {
        let body = r#"{
            "job": {"id": 7, "status": "succeeded", "configType": "sync"},
            "attempts": [
                {"attempt": {"id": 0, "status": "failed"}},
                {"attempt": {"id": 1, "status": "succeeded", "recordsSynced": 1520}}
            ]
        }"#;
        let job: JobEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(job.job.id, 7);
        assert_eq!(job.records_synced(), 1520);
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let adapter = AirbyteSyncAdapter::new("http://airbyte:8001/", "conn").unwrap();
        assert_eq!(adapter.base_url, "http://airbyte:8001");
    }
}
