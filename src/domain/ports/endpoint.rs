//! Endpoint definitions.
//!
//! A query endpoint describes how to read a resource: the request it issues,
//! how the raw response becomes cached data, and which tags that data
//! provides. A mutation endpoint describes a write: its request, the tags it
//! invalidates once it commits, and any optimistic patches applied before the
//! request is sent.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::base_query::ApiRequest;
use crate::domain::errors::QueryError;
use crate::domain::models::patch::Patch;
use crate::domain::models::{QueryKey, Tag};

/// A read operation against the service.
pub trait QueryEndpoint: Send + Sync + 'static {
    /// Arguments; their normalized serialization is part of the cache key.
    type Args: Serialize + Clone + Send + Sync + 'static;
    /// Typed view of the cached (transformed) data.
    type Output: DeserializeOwned;

    fn name(&self) -> &'static str;

    fn request(&self, args: &Self::Args) -> ApiRequest;

    /// Applied once to every successful response before it is stored. An
    /// error here settles the query as failed.
    fn transform_response(&self, raw: Value) -> Result<Value, QueryError> {
        Ok(raw)
    }

    fn provides_tags(&self, _data: &Value, _args: &Self::Args) -> Vec<Tag> {
        Vec::new()
    }
}

/// A write operation against the service.
pub trait MutationEndpoint: Send + Sync + 'static {
    type Args: Clone + Send + Sync + 'static;
    type Output: DeserializeOwned + Send + 'static;

    fn name(&self) -> &'static str;

    fn request(&self, args: &Self::Args) -> ApiRequest;

    /// Tags to invalidate after the write succeeds.
    fn invalidates_tags(&self, response: &Value, args: &Self::Args) -> Vec<Tag>;

    /// Patches applied to cached data before the request is sent.
    fn optimistic_patches(&self, _args: &Self::Args) -> Vec<Patch> {
        Vec::new()
    }
}

/// A query endpoint bound to concrete arguments, with the type erased so the
/// executors can store and re-issue it.
pub trait PreparedQuery: Send + Sync {
    fn key(&self) -> &QueryKey;
    fn request(&self) -> ApiRequest;
    fn transform_response(&self, raw: Value) -> Result<Value, QueryError>;
    fn provides_tags(&self, data: &Value) -> Vec<Tag>;
}

/// [`PreparedQuery`] for a typed endpoint.
pub struct BoundQuery<E: QueryEndpoint> {
    endpoint: Arc<E>,
    args: E::Args,
    key: QueryKey,
}

impl<E: QueryEndpoint> BoundQuery<E> {
    pub fn new(endpoint: Arc<E>, args: E::Args) -> Result<Self, QueryError> {
        let key = QueryKey::new(endpoint.name(), &args).map_err(|e| {
            QueryError::Transform(format!(
                "arguments of {} cannot be serialized: {e}",
                endpoint.name()
            ))
        })?;
        Ok(Self { endpoint, args, key })
    }

    pub fn args(&self) -> &E::Args {
        &self.args
    }
}

impl<E: QueryEndpoint> PreparedQuery for BoundQuery<E> {
    fn key(&self) -> &QueryKey {
        &self.key
    }

    fn request(&self) -> ApiRequest {
        self.endpoint.request(&self.args)
    }

    fn transform_response(&self, raw: Value) -> Result<Value, QueryError> {
        self.endpoint.transform_response(raw)
    }

    fn provides_tags(&self, data: &Value) -> Vec<Tag> {
        self.endpoint.provides_tags(data, &self.args)
    }
}
