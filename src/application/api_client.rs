//! Api client: one cache store and the services operating on it.
//!
//! An `ApiClient` is created once and cloned where needed; clones share the
//! same store. There is no global instance.

use std::sync::Arc;

use super::query_handle::{QueryHandle, QueryState};
use crate::domain::errors::QueryError;
use crate::domain::models::{CacheConfig, CacheEntry, QueryKey, Tag};
use crate::domain::ports::{BaseQuery, BoundQuery, MutationEndpoint, PreparedQuery, QueryEndpoint};
use crate::services::{
    CacheStore, InFlightFetch, MutationExecutor, MutationFuture, PendingMutation, QueryExecutor,
    SubscriptionManager, TagIndex,
};

/// Entry point for queries and mutations against one service.
#[derive(Clone)]
pub struct ApiClient {
    store: Arc<CacheStore>,
    queries: QueryExecutor,
    mutations: MutationExecutor,
    subscriptions: SubscriptionManager,
}

impl ApiClient {
    pub fn new(base_query: Arc<dyn BaseQuery>, cache: &CacheConfig) -> Self {
        let store = Arc::new(CacheStore::new(Arc::new(TagIndex::new())));
        let queries = QueryExecutor::new(
            Arc::clone(&store),
            Arc::clone(&base_query),
            cache.refetch_stale_after(),
        );
        let mutations = MutationExecutor::new(Arc::clone(&store), queries.clone(), base_query);
        let subscriptions = SubscriptionManager::new(queries.clone(), cache.keep_unused_for());

        Self {
            store,
            queries,
            mutations,
            subscriptions,
        }
    }

    /// Subscribe to `endpoint(args)`, starting a fetch if the data is not
    /// cached or is stale.
    pub fn subscribe<E: QueryEndpoint>(&self, endpoint: Arc<E>, args: E::Args) -> Result<QueryHandle<E::Output>, QueryError> {
        let query: Arc<dyn PreparedQuery> = Arc::new(BoundQuery::new(endpoint, args)?);
        let subscription = self.subscriptions.subscribe(query);
        Ok(QueryHandle::new(subscription, self.queries.clone()))
    }

    /// Subscribe, wait for the result, then unsubscribe. The data stays
    /// cached for the eviction window.
    pub async fn query<E: QueryEndpoint>(&self, endpoint: Arc<E>, args: E::Args) -> Result<E::Output, QueryError> {
        let mut handle = self.subscribe(endpoint, args)?;
        handle.result().await
    }

    /// Start a mutation. Its optimistic patches are applied before this
    /// returns.
    pub fn mutate<M: MutationEndpoint>(&self, endpoint: Arc<M>, args: M::Args) -> MutationFuture<M::Output> {
        self.mutations.dispatch(endpoint, args)
    }

    /// Typed snapshot of `endpoint(args)` without subscribing or fetching.
    pub fn read<E: QueryEndpoint>(&self, endpoint: &E, args: &E::Args) -> Result<QueryState<E::Output>, QueryError> {
        let key = QueryKey::new(endpoint.name(), args)?;
        Ok(QueryState::from_entry(&self.store.read(&key)))
    }

    /// Raw entry for `key`.
    pub fn entry(&self, key: &QueryKey) -> CacheEntry {
        self.store.read(key)
    }

    /// Invalidate `tags` outside of any mutation and re-fetch what they hit.
    pub fn invalidate_tags(&self, tags: &[Tag]) -> Vec<QueryKey> {
        self.mutations.invalidate_tags(tags)
    }

    pub fn refetch(&self, key: &QueryKey) -> Option<InFlightFetch> {
        self.queries.refetch(key)
    }

    pub fn pending_mutations(&self) -> Vec<PendingMutation> {
        self.mutations.pending()
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Number of network requests issued by queries so far.
    pub fn network_calls(&self) -> u64 {
        self.queries.network_calls()
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("entries", &self.store.len())
            .field("keep_unused_for", &self.subscriptions.keep_unused_for())
            .finish_non_exhaustive()
    }
}
