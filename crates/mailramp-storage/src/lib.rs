//! MailRamp Storage - Persistence for the campaign dispatch engine
//!
//! This crate provides the data model, repository traits with their
//! PostgreSQL implementations, embedded migrations, and an in-memory
//! store for tests (behind the `testing` feature).

pub mod db;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
