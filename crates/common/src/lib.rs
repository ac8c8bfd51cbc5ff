//! LexDesk Common Library
//!
//! Shared code for the LexDesk backend including:
//! - Database models, the store seam and its PostgreSQL/memory backends
//! - The document lifecycle and access policy
//! - Blob storage, extraction, identity and rate-limit adapters
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod extraction;
pub mod metrics;
pub mod policy;
pub mod ratelimit;
pub mod services;
pub mod storage;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use services::Services;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
