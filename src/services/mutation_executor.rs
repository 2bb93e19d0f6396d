//! Mutation executor: optimistic writes with rollback.
//!
//! Each dispatched mutation moves through `idle -> patched -> committed` or
//! `idle -> patched -> rolled back`:
//!
//! 1. Optimistic patches declared by the endpoint are applied to the store
//!    synchronously, before the request is sent, and their inverse patches
//!    are kept.
//! 2. The request runs as a spawned task, so a caller dropping the returned
//!    future cannot strand a patch.
//! 3. On success the inverse patches are released and every key providing
//!    one of the invalidated tags is re-fetched. The refetched server data
//!    supersedes the patch.
//! 4. On failure the inverse patches are applied in reverse order, restoring
//!    the exact prior data, and the error is returned to the caller.
//!
//! Mutations in flight at the same time are independent. When their patches
//! overlap, the visible state is whatever the last one to settle wrote.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache_store::{CacheStore, InversePatch};
use super::query_executor::QueryExecutor;
use crate::domain::errors::QueryError;
use crate::domain::models::{Patch, PatchTarget, QueryKey, Tag};
use crate::domain::ports::{ApiRequest, BaseQuery, MutationEndpoint};

/// Future returned by [`MutationExecutor::dispatch`].
pub type MutationFuture<T> = BoxFuture<'static, Result<T, QueryError>>;

/// Settlement state of a dispatched mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    Pending,
    Fulfilled,
    Rejected,
}

/// Snapshot of a mutation that has not finished settling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMutation {
    pub id: Uuid,
    pub endpoint: &'static str,
    /// Keys holding an optimistic patch of this mutation.
    #[serde(serialize_with = "serialize_keys")]
    pub patched_keys: Vec<QueryKey>,
    pub state: SettlementState,
    pub started_at: DateTime<Utc>,
}

fn serialize_keys<S: serde::Serializer>(keys: &[QueryKey], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(keys.iter().map(ToString::to_string))
}

/// Runs mutations against the network collaborator. Cheap to clone.
#[derive(Clone)]
pub struct MutationExecutor {
    store: Arc<CacheStore>,
    queries: QueryExecutor,
    base_query: Arc<dyn BaseQuery>,
    pending: Arc<Mutex<HashMap<Uuid, PendingMutation>>>,
}

impl MutationExecutor {
    pub fn new(store: Arc<CacheStore>, queries: QueryExecutor, base_query: Arc<dyn BaseQuery>) -> Self {
        Self {
            store,
            queries,
            base_query,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Apply the endpoint's optimistic patches and start the request.
    ///
    /// The patches are visible in the store when this returns. The future
    /// settles with the server response; invalidation-triggered re-fetches
    /// may still be running at that point. Must be called within a Tokio
    /// runtime.
    pub fn dispatch<M: MutationEndpoint>(&self, endpoint: Arc<M>, args: M::Args) -> MutationFuture<M::Output> {
        let id = Uuid::new_v4();
        let inverses = self.apply_patches(&endpoint.optimistic_patches(&args));

        self.pending.lock().insert(
            id,
            PendingMutation {
                id,
                endpoint: endpoint.name(),
                patched_keys: inverses.iter().map(|inverse| inverse.key().clone()).collect(),
                state: SettlementState::Pending,
                started_at: Utc::now(),
            },
        );

        let request = endpoint.request(&args);
        debug!(mutation = %id, endpoint = endpoint.name(), request = %request, patches = inverses.len(), "Dispatching mutation");

        let executor = self.clone();
        let task = tokio::spawn(async move { executor.settle(id, endpoint, args, request, inverses).await });

        async move {
            task.await
                .unwrap_or_else(|err| Err(QueryError::Network(format!("mutation aborted: {err}"))))
        }
        .boxed()
    }

    /// Dispatch and wait for settlement.
    pub async fn execute<M: MutationEndpoint>(&self, endpoint: Arc<M>, args: M::Args) -> Result<M::Output, QueryError> {
        self.dispatch(endpoint, args).await
    }

    /// Mutations dispatched but not yet fully settled.
    pub fn pending(&self) -> Vec<PendingMutation> {
        let mut pending: Vec<PendingMutation> = self.pending.lock().values().cloned().collect();
        pending.sort_by_key(|mutation| mutation.started_at);
        pending
    }

    /// Invalidate `tags` and re-fetch the affected queries.
    pub fn invalidate_tags(&self, tags: &[Tag]) -> Vec<QueryKey> {
        let affected = self.store.tag_index().invalidate(tags);
        self.queries.invalidate(&affected)
    }

    fn apply_patches(&self, patches: &[Patch]) -> Vec<InversePatch> {
        let mut inverses = Vec::new();
        for patch in patches {
            let keys = match &patch.target {
                PatchTarget::Key(key) => vec![key.clone()],
                PatchTarget::Endpoint(endpoint) => self.store.keys_for_endpoint(endpoint),
            };
            for key in keys {
                let recipe = patch.recipe();
                if let Some(inverse) = self.store.apply_patch(&key, |data| recipe(data)) {
                    inverses.push(inverse);
                }
            }
        }
        inverses
    }

    async fn settle<M: MutationEndpoint>(
        self,
        id: Uuid,
        endpoint: Arc<M>,
        args: M::Args,
        request: ApiRequest,
        inverses: Vec<InversePatch>,
    ) -> Result<M::Output, QueryError> {
        let result = self.base_query.execute(request).await;

        match result {
            Ok(response) => {
                self.set_state(id, SettlementState::Fulfilled);
                for inverse in inverses {
                    self.store.release(inverse);
                }

                let tags = endpoint.invalidates_tags(&response, &args);
                let refetched = self.invalidate_tags(&tags);
                info!(
                    mutation = %id,
                    endpoint = endpoint.name(),
                    tags = ?tags.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    refetched = refetched.len(),
                    "Mutation committed"
                );

                self.pending.lock().remove(&id);
                decode::<M::Output>(response)
            }
            Err(err) => {
                self.set_state(id, SettlementState::Rejected);
                warn!(mutation = %id, endpoint = endpoint.name(), error = %err, rollbacks = inverses.len(), "Mutation failed, rolling back");

                for inverse in inverses.into_iter().rev() {
                    self.store.undo(inverse);
                }

                self.pending.lock().remove(&id);
                Err(err)
            }
        }
    }

    fn set_state(&self, id: Uuid, state: SettlementState) {
        if let Some(mutation) = self.pending.lock().get_mut(&id) {
            mutation.state = state;
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: Value) -> Result<T, QueryError> {
    serde_json::from_value(response).map_err(QueryError::from)
}
