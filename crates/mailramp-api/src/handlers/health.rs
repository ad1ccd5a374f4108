//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AppState;

/// Basic health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Detailed health response with component checks
#[derive(Debug, Serialize, Deserialize)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
}

/// Individual component health status
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// healthy / unhealthy
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready: the store must answer
pub async fn readiness(State(state): State<Arc<AppState>>) -> Result<StatusCode, StatusCode> {
    state
        .health
        .health_check()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(StatusCode::OK)
}

/// GET /health/detailed
pub async fn health_detailed(State(state): State<Arc<AppState>>) -> Json<DetailedHealthResponse> {
    let start = std::time::Instant::now();
    let db_check = state.health.health_check().await;
    let db_latency = start.elapsed().as_millis() as u64;

    let database = match db_check {
        Ok(()) => ComponentHealth {
            status: "healthy".to_string(),
            latency_ms: Some(db_latency),
            error: None,
        },
        Err(e) => ComponentHealth {
            status: "unhealthy".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    Json(DetailedHealthResponse {
        status: database.status.clone(),
        checks: HealthChecks { database },
    })
}

#[cfg(test)]
mod tests {
    use crate::testing::TestApp;
    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    #[tokio::test]
    async fn health_endpoints_skip_the_trigger_token() {
        let app = TestApp::new(Some("s3cret"));
        let server = app.server();

        let health = server.get("/health").await;
        health.assert_status(StatusCode::OK);
        let body: Value = health.json();
        assert_eq!(body["status"], "healthy");

        server.get("/health/live").await.assert_status(StatusCode::OK);
        server.get("/health/ready").await.assert_status(StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_fails_when_store_is_down() {
        let app = TestApp::new(None);
        app.store.fail_with(Some("database unavailable"));
        let server = app.server();

        server
            .get("/health/ready")
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);

        let detailed = server.get("/health/detailed").await;
        detailed.assert_status(StatusCode::OK);
        let body: Value = detailed.json();
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["checks"]["database"]["status"], "unhealthy");
    }
}
