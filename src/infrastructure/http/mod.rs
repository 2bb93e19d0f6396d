//! HTTP adapter for the users service.

pub mod base_query;

pub use base_query::HttpBaseQuery;
