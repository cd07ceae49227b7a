//! Health check and API info handlers.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Public API version string.
pub const API_VERSION: &str = "v1";

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub version: &'static str,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "API is running",
        version: API_VERSION,
    })
}

#[derive(Serialize)]
pub struct ApiEndpoints {
    pub authentication: &'static str,
    pub recipes: &'static str,
    pub health: &'static str,
    pub media: &'static str,
}

/// API information response.
#[derive(Serialize)]
pub struct ApiInfoResponse {
    pub api_name: &'static str,
    pub version: &'static str,
    pub build: &'static str,
    pub endpoints: ApiEndpoints,
}

pub async fn api_info() -> Json<ApiInfoResponse> {
    Json(ApiInfoResponse {
        api_name: "Recipe API",
        version: API_VERSION,
        build: env!("CARGO_PKG_VERSION"),
        endpoints: ApiEndpoints {
            authentication: "/api/v1/auth/",
            recipes: "/api/v1/recipes/",
            health: "/health/",
            media: "/media/",
        },
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub database: CheckStatus,
    pub queue: CheckStatus,
    pub storage: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(latency_ms: u64) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            latency_ms: Some(latency_ms),
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn from_result<E: std::fmt::Display>(start: Instant, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::ok(start.elapsed().as_millis() as u64),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// Readiness check endpoint (readiness probe).
/// Checks the database, the task queue and the media root.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let start = Instant::now();
    let database = CheckStatus::from_result(start, state.db.ping().await);

    let start = Instant::now();
    let queue = CheckStatus::from_result(start, state.queue.ping().await);

    let start = Instant::now();
    let storage = CheckStatus::from_result(start, state.storage.check_connectivity().await);

    let all_ok = database.status == "ok" && queue.status == "ok" && storage.status == "ok";

    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks {
            database,
            queue,
            storage,
        },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
