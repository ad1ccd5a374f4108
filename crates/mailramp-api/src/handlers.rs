//! API request handlers

pub mod dispatch;
pub mod health;

pub use dispatch::*;
pub use health::*;
