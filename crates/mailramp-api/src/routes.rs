//! API routes

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{trigger_auth_middleware, AppState};
use crate::handlers::{dispatch, health};
use crate::openapi::create_openapi_routes;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/detailed", get(health::health_detailed))
        .with_state(state.clone());

    let dispatch_routes = Router::new().route(
        "/",
        get(dispatch::trigger_dispatch).post(dispatch::trigger_dispatch),
    );

    let api_v1 = Router::new()
        .nest("/dispatch", dispatch_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trigger_auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .merge(create_openapi_routes())
        .layer(TraceLayer::new_for_http())
}
