//! Dispatch trigger handler

use axum::{extract::State, http::StatusCode, Json};
use mailramp_core::CycleSummary;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::auth::AppState;

/// Body returned when a cycle aborts
#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub success: bool,
    pub error: String,
}

/// Run one dispatch cycle
///
/// GET|POST /api/v1/dispatch
///
/// Responds 200 with the cycle summary whenever the cycle ran to the end,
/// even if individual messages failed. Storage failures that abort the cycle
/// surface as 500.
pub async fn trigger_dispatch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CycleSummary>, (StatusCode, Json<DispatchFailure>)> {
    info!("Dispatch cycle triggered over HTTP");

    match state.cycle.run_once().await {
        Ok(summary) => Ok(Json(summary)),
        Err(e) => {
            error!(code = e.code(), "Dispatch cycle failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DispatchFailure {
                    success: false,
                    error: e.to_string(),
                }),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::TestApp;
    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    #[tokio::test]
    async fn post_runs_a_cycle_and_returns_the_summary() {
        let app = TestApp::new(None);
        let entries = app.seed_sending_campaign(3);

        let response = app.server().post("/api/v1/dispatch").await;

        response.assert_status(StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["success"], Value::Bool(true));
        assert_eq!(body["sent"], 3);
        assert_eq!(body["failed"], 0);
        assert_eq!(body["processed"], 3);
        assert_eq!(body["campaigns_completed"], 1);
        assert_eq!(app.sent_count(&entries), 3);
    }

    #[tokio::test]
    async fn get_is_accepted_as_a_trigger() {
        let app = TestApp::new(None);

        let response = app.server().get("/api/v1/dispatch").await;

        response.assert_status(StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["success"], Value::Bool(true));
        assert_eq!(body["processed"], 0);
    }

    #[tokio::test]
    async fn storage_failure_returns_500() {
        let app = TestApp::new(None);
        app.store.fail_with(Some("connection reset"));

        let response = app.server().post("/api/v1/dispatch").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["success"], Value::Bool(false));
        assert!(body["error"]
            .as_str()
            .unwrap_or_default()
            .contains("connection reset"));
    }

    #[tokio::test]
    async fn configured_token_is_enforced() {
        let app = TestApp::new(Some("s3cret"));
        let server = app.server();

        let missing = server.post("/api/v1/dispatch").await;
        missing.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = missing.json();
        assert_eq!(body["success"], Value::Bool(false));

        let wrong = server
            .post("/api/v1/dispatch")
            .add_header(
                "authorization".parse().unwrap(),
                "Bearer nope".parse().unwrap(),
            )
            .await;
        wrong.assert_status(StatusCode::UNAUTHORIZED);

        let bearer = server
            .post("/api/v1/dispatch")
            .add_header(
                "authorization".parse().unwrap(),
                "Bearer s3cret".parse().unwrap(),
            )
            .await;
        bearer.assert_status(StatusCode::OK);

        let api_key = server
            .post("/api/v1/dispatch")
            .add_header("x-api-key".parse().unwrap(), "s3cret".parse().unwrap())
            .await;
        api_key.assert_status(StatusCode::OK);
    }
}
