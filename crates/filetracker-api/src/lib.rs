//! Filetracker API
//!
//! HTTP boundary for the file change tracker: an axum router over the
//! [`Tracker`](filetracker_core::Tracker) trait, a reqwest client for it, and
//! the service assembly used by the `filetracker` binary.

pub mod app;
pub mod client;
pub mod handler;

pub use app::{AppError, TrackerApp};
pub use client::{ClientError, TrackerClient};
pub use handler::{create_router, ApiError, AppState, HealthResponse};
