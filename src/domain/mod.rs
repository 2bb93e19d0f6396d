//! Domain layer for query-store
//!
//! This module contains the cache data model, the users resource models and
//! the ports the engine depends on.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{ErrorInfo, ErrorKind, QueryError, QueryResult};
