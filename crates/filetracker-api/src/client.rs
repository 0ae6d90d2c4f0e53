//! Client for a running tracker service
//!
//! Used by the `submit`, `logs` and `health` CLI subcommands.

use filetracker_core::LogEntry;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::handler::{CommandsRequest, ErrorInfo, HealthResponse, MessageResponse};

/// Tracker service client
#[derive(Debug, Clone)]
pub struct TrackerClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl TrackerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            // submissions wait while the executor queue is full
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enqueue commands; returns the server's acknowledgement message
    pub async fn submit_commands(&self, commands: Vec<String>) -> Result<String, ClientError> {
        let url = format!("{}/v1/commands", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&CommandsRequest { commands })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let body: MessageResponse = Self::decode(response).await?;
        Ok(body.message)
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let url = format!("{}/v1/health", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Self::decode(response).await
    }

    /// Fetch a page of the change log, most recent first
    pub async fn logs(&self, limit: usize, offset: usize) -> Result<Vec<LogEntry>, ClientError> {
        let url = format!("{}/v1/logs", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit), ("offset", offset)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| ClientError::Parse(e.to_string()))
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorInfo>(&error_text)
                .map(|info| info.message)
                .unwrap_or(error_text);
            Err(ClientError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = TrackerClient::new("http://localhost:9000/");
        assert_eq!(client.base_url, "http://localhost:9000");
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::Server {
            status: 503,
            message: "command executor is stopped".to_string(),
        };
        assert_eq!(err.to_string(), "Server error 503: command executor is stopped");
    }
}
