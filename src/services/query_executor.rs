//! Query executor: fetches, transforms and stores query results.
//!
//! Every fetch runs as its own spawned task and is registered per key while
//! it is in flight. A second request for the same key attaches to the
//! registered task instead of issuing another network call, and dropping
//! every waiting caller never cancels the task: its result is still written
//! to the store, unless an invalidation superseded it in the meantime. A
//! superseded fetch writes nothing; its callers wait for the fetch that
//! replaced it instead.
//!
//! Failed fetches are written as `error` and never retried automatically;
//! an explicit [`QueryExecutor::refetch`] or a later `ensure` retries.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::cache_store::{CacheStore, Ensured, InFlightFetch};
use crate::domain::errors::QueryError;
use crate::domain::models::{CacheEntry, QueryKey, Tag};
use crate::domain::ports::{BaseQuery, PreparedQuery};

/// One fetch task. Resolves to `None` when its response was discarded.
type RunHandle = Shared<BoxFuture<'static, Option<CacheEntry>>>;

type InFlightMap = Arc<Mutex<HashMap<QueryKey, InFlight>>>;

struct InFlight {
    generation: u64,
    run: RunHandle,
    /// What callers await: `run`, or the fetch that superseded it.
    fetch: InFlightFetch,
}

/// Runs queries through the network collaborator and writes their results
/// into the [`CacheStore`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<CacheStore>,
    base_query: Arc<dyn BaseQuery>,
    in_flight: InFlightMap,
    descriptors: Arc<Mutex<HashMap<QueryKey, Arc<dyn PreparedQuery>>>>,
    generation: Arc<AtomicU64>,
    refetch_after: Option<Duration>,
    network_calls: Arc<AtomicU64>,
}

impl QueryExecutor {
    /// Create an executor. `refetch_after` is the freshness threshold used
    /// by [`ensure`](Self::ensure); `None` never refreshes successful data.
    pub fn new(
        store: Arc<CacheStore>,
        base_query: Arc<dyn BaseQuery>,
        refetch_after: Option<Duration>,
    ) -> Self {
        Self {
            store,
            base_query,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            descriptors: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            refetch_after,
            network_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Make sure the query's entry is loaded and fresh.
    pub fn ensure(&self, query: Arc<dyn PreparedQuery>) -> Ensured {
        let key = query.key().clone();
        self.remember(&query);
        self.store
            .ensure(&key, self.refetch_after, || self.fetch(query))
    }

    /// Start fetching `query`, or attach to the fetch already running for
    /// its key. Must be called within a Tokio runtime.
    pub fn fetch(&self, query: Arc<dyn PreparedQuery>) -> InFlightFetch {
        let key = query.key().clone();
        let mut in_flight = self.in_flight.lock();

        if let Some(running) = in_flight.get(&key) {
            debug!(key = %key, "Attaching to in-flight fetch");
            return running.fetch.clone();
        }

        self.remember(&query);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let run = self.start(query, generation);
        let fetch = self.follow(key.clone(), run.clone());
        in_flight.insert(
            key,
            InFlight {
                generation,
                run,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    /// Explicitly re-run a known query. Data already cached keeps being
    /// served while the refetch runs. Returns `None` for keys the executor
    /// has no request for.
    pub fn refetch(&self, key: &QueryKey) -> Option<InFlightFetch> {
        let query = self.descriptor(key)?;
        if !self.is_in_flight(key) {
            self.store.mark_refetching(key);
        }
        Some(self.fetch(query))
    }

    /// Mark every key `loading` and re-fetch it.
    ///
    /// A key with a fetch already in flight gets a new fetch queued behind
    /// it, and the running fetch's response is discarded: the entry never
    /// shows data requested before the invalidation. Callers of the running
    /// fetch settle with the queued one. Returns the keys a refetch was
    /// scheduled for.
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub fn invalidate(&self, keys: &BTreeSet<QueryKey>) -> Vec<QueryKey> {
        let mut scheduled = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(query) = self.descriptor(key) else {
                debug!(key = %key, "No request known for invalidated key");
                continue;
            };

            self.store.mark_loading(key);
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key).map(|running| running.run.clone()) {
                Some(previous) => {
                    // Registered right away so the running fetch sees it has
                    // been superseded and discards its response.
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let executor = self.clone();
                    let chained_key = key.clone();
                    let run = async move {
                        previous.await;
                        // Superseded again before it even started.
                        if !executor.is_current(&chained_key, generation) {
                            return None;
                        }
                        executor.start(query, generation).await
                    }
                    .boxed()
                    .shared();
                    let fetch = self.follow(key.clone(), run.clone());
                    in_flight.insert(
                        key.clone(),
                        InFlight {
                            generation,
                            run: run.clone(),
                            fetch,
                        },
                    );
                    drop(tokio::spawn(run));
                    debug!(key = %key, "Refetch queued behind in-flight fetch");
                }
                None => {
                    drop(in_flight);
                    // Runs detached; nobody needs to await it.
                    drop(self.fetch(query));
                }
            }
            scheduled.push(key.clone());
        }

        scheduled
    }

    /// Forget the request for `key`, after its entry was evicted.
    pub fn forget(&self, key: &QueryKey) {
        self.descriptors.lock().remove(key);
    }

    pub fn is_in_flight(&self, key: &QueryKey) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Number of network requests issued so far.
    pub fn network_calls(&self) -> u64 {
        self.network_calls.load(Ordering::Relaxed)
    }

    fn is_current(&self, key: &QueryKey, generation: u64) -> bool {
        self.in_flight
            .lock()
            .get(key)
            .is_some_and(|running| running.generation == generation)
    }

    fn descriptor(&self, key: &QueryKey) -> Option<Arc<dyn PreparedQuery>> {
        self.descriptors.lock().get(key).cloned()
    }

    fn remember(&self, query: &Arc<dyn PreparedQuery>) {
        self.descriptors
            .lock()
            .insert(query.key().clone(), Arc::clone(query));
    }

    /// Spawn the fetch task for `generation`. Registration in `in_flight`
    /// is the caller's job.
    fn start(&self, query: Arc<dyn PreparedQuery>, generation: u64) -> RunHandle {
        let key = query.key().clone();
        self.network_calls.fetch_add(1, Ordering::Relaxed);

        let task = tokio::spawn(Self::run(
            Arc::clone(&self.store),
            Arc::clone(&self.base_query),
            Arc::clone(&self.in_flight),
            generation,
            query,
        ));

        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        async move {
            match task.await {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(key = %key, error = %err, "Fetch task did not complete");
                    let aborted = QueryError::Network(format!("fetch aborted: {err}"));
                    Self::conclude(&store, &in_flight, &key, generation, Err(aborted))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Handle for callers of `run`. A discarded run hands its callers over
    /// to whichever fetch replaced it.
    fn follow(&self, key: QueryKey, run: RunHandle) -> InFlightFetch {
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        async move {
            if let Some(entry) = run.await {
                return entry;
            }
            let replacement = in_flight.lock().get(&key).map(|running| running.fetch.clone());
            match replacement {
                Some(fetch) => fetch.await,
                None => store.read(&key),
            }
        }
        .boxed()
        .shared()
    }

    async fn run(
        store: Arc<CacheStore>,
        base_query: Arc<dyn BaseQuery>,
        in_flight: InFlightMap,
        generation: u64,
        query: Arc<dyn PreparedQuery>,
    ) -> Option<CacheEntry> {
        let key = query.key().clone();
        let outcome = AssertUnwindSafe(Self::load(base_query, query))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                warn!(key = %key, panic = panic_message(panic.as_ref()), "Fetch panicked");
                Err(QueryError::Network("fetch panicked".to_string()))
            });
        Self::conclude(&store, &in_flight, &key, generation, outcome)
    }

    async fn load(
        base_query: Arc<dyn BaseQuery>,
        query: Arc<dyn PreparedQuery>,
    ) -> Result<(Value, Vec<Tag>), QueryError> {
        let request = query.request();
        debug!(key = %query.key(), request = %request, "Fetching");

        let data = query.transform_response(base_query.execute(request).await?)?;
        let tags = query.provides_tags(&data);
        Ok((data, tags))
    }

    /// Write the outcome of `generation` and drop its registration, unless
    /// a newer generation took over the key. Holds the `in_flight` lock
    /// throughout so no invalidation lands between the check and the write.
    fn conclude(
        store: &CacheStore,
        in_flight: &Mutex<HashMap<QueryKey, InFlight>>,
        key: &QueryKey,
        generation: u64,
        outcome: Result<(Value, Vec<Tag>), QueryError>,
    ) -> Option<CacheEntry> {
        let mut in_flight = in_flight.lock();
        if in_flight.get(key).is_some_and(|running| running.generation != generation) {
            debug!(key = %key, "Discarding response requested before invalidation");
            return None;
        }

        let entry = match outcome {
            Ok((data, tags)) => store.write(key, data, tags),
            Err(err) => {
                warn!(key = %key, error = %err, "Query failed");
                store.write_error(key, &err)
            }
        };
        in_flight.remove(key);
        Some(entry)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
