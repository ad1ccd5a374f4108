//! MailRamp API - HTTP surface of the dispatch engine
//!
//! Exposes the dispatch trigger used by external schedulers, health checks
//! and a small OpenAPI document.

pub mod auth;
pub mod handlers;
pub mod openapi;
pub mod routes;

pub use auth::AppState;
pub use openapi::create_openapi_routes;
pub use routes::create_router;

#[cfg(test)]
pub(crate) mod testing;
