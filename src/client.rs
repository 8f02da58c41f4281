//! HTTP client for the remote capture service
//!
//! [`CaptureClient`] is the seam between the pipeline and the service so the
//! pipeline can be driven against an in-memory sink in tests.

use crate::{CaptureConfig, CaptureError, CreateExecution, CreateScreenshot, ExecutionId};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

/// Calls made by the pipeline against the capture service.
#[async_trait]
pub trait CaptureClient: Send + Sync {
    /// Registers a test run, returning the id the service assigned to it.
    async fn create_execution(&self, message: &CreateExecution)
        -> Result<ExecutionId, CaptureError>;

    /// Delivers one screenshot.
    async fn send_screenshot(&self, message: &CreateScreenshot) -> Result<(), CaptureError>;
}

/// [`CaptureClient`] talking JSON over HTTP.
///
/// Both calls expect `201 Created`; anything else is an error.
#[derive(Debug, Clone)]
pub struct HttpCaptureClient {
    http: reqwest::Client,
    executions_url: String,
    screenshot_url: String,
}

impl HttpCaptureClient {
    pub fn new(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let (executions_url, screenshot_url) =
            match (config.executions_endpoint(), config.screenshot_endpoint()) {
                (Some(executions), Some(screenshot)) => (executions, screenshot),
                _ => {
                    return Err(CaptureError::Configuration(
                        "Capture URL is not configured".to_string(),
                    ))
                }
            };

        // The capture service commonly runs with self-signed certificates
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| CaptureError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            executions_url,
            screenshot_url,
        })
    }
}

#[async_trait]
impl CaptureClient for HttpCaptureClient {
    async fn create_execution(
        &self,
        message: &CreateExecution,
    ) -> Result<ExecutionId, CaptureError> {
        let response = self
            .http
            .post(&self.executions_url)
            .json(message)
            .send()
            .await
            .map_err(|e| CaptureError::RegistrationFailed(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(CaptureError::UnexpectedStatus {
                endpoint: self.executions_url.clone(),
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CaptureError::RegistrationFailed(e.to_string()))?;

        let id = match body.get("executionID") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(CaptureError::RegistrationFailed(
                    "Response has no executionID".to_string(),
                ))
            }
        };

        debug!("Capture execution {} created for {}", id, message.test_id);
        Ok(ExecutionId::new(id))
    }

    async fn send_screenshot(&self, message: &CreateScreenshot) -> Result<(), CaptureError> {
        let response = self
            .http
            .post(&self.screenshot_url)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            debug!("Capture rejected screenshot with {}: {}", status, body);
            return Err(CaptureError::UnexpectedStatus {
                endpoint: self.screenshot_url.clone(),
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}
