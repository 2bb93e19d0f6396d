//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces the cache engine depends on:
//! - BaseQuery: network operations against the resource service
//! - QueryEndpoint / MutationEndpoint: declarative endpoint definitions
//! - PreparedQuery: an endpoint bound to arguments, re-issuable by the executors

pub mod base_query;
pub mod endpoint;

pub use base_query::{ApiRequest, BaseQuery, HttpMethod};
pub use endpoint::{BoundQuery, MutationEndpoint, PreparedQuery, QueryEndpoint};
