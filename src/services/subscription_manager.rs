//! Subscription manager: reference counting and deferred eviction.
//!
//! Subscribing increments the entry's subscriber count and makes sure the
//! entry is loaded. Releasing decrements it; when it reaches zero an
//! eviction timer is armed for `keep_unused_for`. A new subscription inside
//! that window cancels the timer and reuses the cached data. When the timer
//! fires on an entry still pinned by an optimistic patch or a running fetch,
//! it is re-armed instead.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::cache_store::{CacheStore, EvictOutcome};
use super::query_executor::QueryExecutor;
use crate::domain::models::{CacheEntry, QueryKey};
use crate::domain::ports::PreparedQuery;

struct EvictionTimer {
    id: u64,
    handle: JoinHandle<()>,
}

/// Tracks subscriptions and evicts entries nobody uses any more. Cheap to
/// clone; clones share state.
#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<CacheStore>,
    executor: QueryExecutor,
    keep_unused_for: Duration,
    timers: Arc<Mutex<HashMap<QueryKey, EvictionTimer>>>,
    next_timer: Arc<AtomicU64>,
}

impl SubscriptionManager {
    pub fn new(executor: QueryExecutor, keep_unused_for: Duration) -> Self {
        Self {
            store: Arc::clone(executor.store()),
            executor,
            keep_unused_for,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_timer: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn keep_unused_for(&self) -> Duration {
        self.keep_unused_for
    }

    /// Register interest in `query` and make sure its entry is loaded.
    ///
    /// The returned handle holds the subscription until it is dropped.
    pub fn subscribe(&self, query: Arc<dyn PreparedQuery>) -> QuerySubscription {
        let key = query.key().clone();
        let (receiver, count) = self.store.add_subscriber(&key);
        self.cancel_eviction(&key);
        debug!(key = %key, subscribers = count, "Subscribed");

        // Fresh data is served without a network call; anything else starts
        // or joins a fetch that runs detached from this handle.
        drop(self.executor.ensure(query));

        QuerySubscription {
            key,
            receiver,
            manager: self.clone(),
        }
    }

    /// Number of keys with an armed eviction timer.
    pub fn pending_evictions(&self) -> usize {
        self.timers.lock().len()
    }

    fn release(&self, key: &QueryKey) {
        let remaining = self.store.remove_subscriber(key);
        debug!(key = %key, subscribers = remaining, "Unsubscribed");
        if remaining == 0 {
            self.schedule_eviction(key.clone());
        }
    }

    fn schedule_eviction(&self, key: QueryKey) {
        // Without a runtime there is nothing to run the timer on.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            if self.store.evict_if_unused(&key) == EvictOutcome::Evicted {
                self.executor.forget(&key);
            }
            return;
        };

        let id = self.next_timer.fetch_add(1, Ordering::Relaxed);
        let manager = self.clone();
        let handle = runtime.spawn(manager.evict_after_delay(key.clone(), id));

        trace!(key = %key, delay = ?self.keep_unused_for, "Eviction scheduled");
        if let Some(previous) = self.timers.lock().insert(key, EvictionTimer { id, handle }) {
            previous.handle.abort();
        }
    }

    fn cancel_eviction(&self, key: &QueryKey) {
        if let Some(timer) = self.timers.lock().remove(key) {
            timer.handle.abort();
            trace!(key = %key, "Eviction cancelled");
        }
    }

    async fn evict_after_delay(self, key: QueryKey, id: u64) {
        loop {
            tokio::time::sleep(self.keep_unused_for).await;
            match self.store.evict_if_unused(&key) {
                EvictOutcome::Pinned => {
                    trace!(key = %key, "Entry pinned, eviction re-armed");
                }
                EvictOutcome::Evicted => {
                    self.executor.forget(&key);
                    break;
                }
                EvictOutcome::InUse | EvictOutcome::Missing => break,
            }
        }

        let mut timers = self.timers.lock();
        if timers.get(&key).is_some_and(|timer| timer.id == id) {
            timers.remove(&key);
        }
    }
}

/// A live subscription to one cache entry. Dropping it unsubscribes.
pub struct QuerySubscription {
    key: QueryKey,
    receiver: watch::Receiver<CacheEntry>,
    manager: SubscriptionManager,
}

impl QuerySubscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The entry as last published.
    pub fn entry(&self) -> CacheEntry {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change of the entry.
    ///
    /// Returns `None` once the entry is gone, which cannot happen while this
    /// subscription is held.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the entry is `success` or `error` with no refresh running.
    pub async fn settled(&mut self) -> CacheEntry {
        let settled = self
            .receiver
            .wait_for(|entry| entry.status.is_settled() && !entry.is_fetching())
            .await
            .map(|entry| entry.clone());
        settled.unwrap_or_else(|_| self.manager.store.read(&self.key))
    }

    pub fn unsubscribe(self) {}
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        self.manager.release(&self.key);
    }
}

impl std::fmt::Debug for QuerySubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
