//! HTTP handlers for the tracker service
//!
//! Routes:
//! - `POST /v1/commands` - enqueue commands for the executor
//! - `GET /v1/health` - liveness of both engines
//! - `GET /v1/logs` - paginated change log, most recent first
//! - `GET /metrics` - Prometheus exposition
//!
//! Every error body is an [`ErrorInfo`].

pub mod routes;

pub use routes::{create_router, ApiError};

use filetracker_core::Tracker;
use prometheus::Registry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Response message for an accepted command batch
pub const COMMANDS_ACCEPTED: &str = "commands added to queue";

/// Handler state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<dyn Tracker>,
    pub registry: Registry,
}

impl AppState {
    pub fn new(tracker: Arc<dyn Tracker>, registry: Registry) -> Self {
        Self { tracker, registry }
    }
}

/// Error information for API responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Body of `POST /v1/commands`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsRequest {
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Body of `GET /v1/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub poller_alive: bool,
    pub executor_alive: bool,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.poller_alive && self.executor_alive
    }
}

/// Raw query of `GET /v1/logs`; parsed by the handler so bad values get a
/// descriptive 400
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}
