//! Route definitions

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use filetracker_core::sink::DEFAULT_PAGE_SIZE;
use filetracker_core::{ExecutorError, LogEntry};
use prometheus::{Encoder, TextEncoder};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{
    AppState, CommandsRequest, ErrorInfo, HealthResponse, LogsQuery, MessageResponse,
    COMMANDS_ACCEPTED,
};

/// API errors, rendered as `{code, message}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    InternalError(String),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unavailable(_) => "UNAVAILABLE",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Unavailable(msg)
            | ApiError::InternalError(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorInfo::new(self.error_code(), self.message());
        (self.status_code(), Json(body)).into_response()
    }
}

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/v1/commands", post(add_commands))
        .route("/v1/health", get(health_check))
        .route("/v1/logs", get(get_logs))
        .route("/metrics", get(metrics))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// POST /v1/commands
///
/// Suspends while the executor queue is full.
pub async fn add_commands(
    State(state): State<AppState>,
    payload: Result<Json<CommandsRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if request.commands.is_empty() {
        return Err(ApiError::BadRequest("commands must not be empty".to_string()));
    }

    let count = request.commands.len();
    state
        .tracker
        .add_commands(request.commands)
        .await
        .map_err(|e| match e {
            ExecutorError::Stopped => ApiError::Unavailable(e.to_string()),
            ExecutorError::AlreadyStarted => ApiError::InternalError(e.to_string()),
        })?;

    tracing::debug!(count, "commands queued");
    Ok(Json(MessageResponse {
        message: COMMANDS_ACCEPTED.to_string(),
    }))
}

/// GET /v1/health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        poller_alive: state.tracker.is_poller_alive(),
        executor_alive: state.tracker.is_executor_alive(),
    })
}

/// GET /v1/logs?limit=&offset=
pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    let limit = parse_param("limit", query.limit.as_deref())?.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = parse_param("offset", query.offset.as_deref())?.unwrap_or(0);

    if limit < 1 {
        return Err(ApiError::BadRequest("limit must be at least 1".to_string()));
    }

    let entries = state.tracker.get_logs(limit, offset).await.map_err(|e| {
        tracing::error!(error = %e, limit, offset, "failed to read change log");
        ApiError::InternalError("error getting logs".to_string())
    })?;

    Ok(Json(entries))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response())
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("resource: ({}) could not be found", uri.path()))
}

fn parse_param(name: &str, raw: Option<&str>) -> Result<Option<usize>, ApiError> {
    raw.map(|value| {
        value
            .parse::<usize>()
            .map_err(|_| ApiError::BadRequest(format!("invalid {name}: {value}")))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_mapping() {
        let error = ApiError::BadRequest("bad".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.error_code(), "BAD_REQUEST");

        let error = ApiError::Unavailable("stopped".to_string());
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("limit", None).unwrap(), None);
        assert_eq!(parse_param("limit", Some("25")).unwrap(), Some(25));
        assert!(parse_param("offset", Some("-1")).is_err());
        assert!(parse_param("limit", Some("ten")).is_err());
    }
}
