//! Cache store: the single owner of every cache entry.
//!
//! Other components read entries or submit well-defined write operations
//! (`write`, `write_error`, `apply_patch`, ...); none of them touches an
//! entry's fields directly. Every operation runs inside one short critical
//! section and publishes the new entry to its watchers before returning, so
//! no watcher observes a half-updated entry.

use futures::future::{BoxFuture, Shared};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::tag_index::TagIndex;
use crate::domain::errors::{ErrorInfo, QueryError};
use crate::domain::models::{CacheEntry, QueryKey, QueryStatus, Tag};

/// Shared handle to a running fetch; resolves to the settled entry.
pub type InFlightFetch = Shared<BoxFuture<'static, CacheEntry>>;

/// Result of [`CacheStore::ensure`].
pub enum Ensured {
    /// The entry can be served as-is. A stale entry is served with
    /// `is_refetching` set while a background refresh runs.
    Ready(CacheEntry),
    /// The entry is loading; the handle resolves once it settles.
    Settling(InFlightFetch),
}

impl Ensured {
    /// Wait for the entry to settle.
    pub async fn settled(self) -> CacheEntry {
        match self {
            Self::Ready(entry) => entry,
            Self::Settling(fetch) => fetch.await,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Outcome of [`CacheStore::evict_if_unused`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    Evicted,
    /// The entry still has subscribers.
    InUse,
    /// An optimistic patch or a fetch still references the entry.
    Pinned,
    Missing,
}

/// Undo record for one applied optimistic patch.
///
/// Holds a deep copy of the data as it was before the patch, so restoring it
/// is exact.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "an inverse patch must be undone or released"]
pub struct InversePatch {
    key: QueryKey,
    previous: Value,
}

impl InversePatch {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The data as it was before the patch.
    pub fn previous(&self) -> &Value {
        &self.previous
    }
}

struct Slot {
    entry: CacheEntry,
    notifier: watch::Sender<CacheEntry>,
}

impl Slot {
    fn new(key: QueryKey) -> Self {
        let entry = CacheEntry::uninitialized(key);
        let (notifier, _) = watch::channel(entry.clone());
        Self { entry, notifier }
    }

    fn publish(&self) {
        self.notifier.send_replace(self.entry.clone());
    }
}

/// Owns one [`CacheEntry`] per query key.
pub struct CacheStore {
    entries: RwLock<HashMap<QueryKey, Slot>>,
    tags: Arc<TagIndex>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(Arc::new(TagIndex::new()))
    }
}

impl CacheStore {
    pub fn new(tags: Arc<TagIndex>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            tags,
        }
    }

    pub fn tag_index(&self) -> &Arc<TagIndex> {
        &self.tags
    }

    /// Current entry for `key`; `uninitialized` if none exists. Never blocks
    /// on network work.
    pub fn read(&self, key: &QueryKey) -> CacheEntry {
        self.entries
            .read()
            .get(key)
            .map_or_else(|| CacheEntry::uninitialized(key.clone()), |slot| slot.entry.clone())
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Receiver notified on every change of the entry, creating an
    /// `uninitialized` entry if needed.
    pub fn watch(&self, key: &QueryKey) -> watch::Receiver<CacheEntry> {
        let mut entries = self.entries.write();
        entries
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone()))
            .notifier
            .subscribe()
    }

    /// Serve the entry if it is usable, otherwise start loading it.
    ///
    /// - `success` and fresh: served as-is.
    /// - `success` and older than `refetch_after`: served as-is while
    ///   `fetcher` refreshes it in the background.
    /// - `loading`: `fetcher` is asked for the running fetch.
    /// - `uninitialized` or `error`: the entry becomes `loading` and
    ///   `fetcher` starts a fetch.
    pub fn ensure<F>(&self, key: &QueryKey, refetch_after: Option<Duration>, fetcher: F) -> Ensured
    where
        F: FnOnce() -> InFlightFetch,
    {
        let now = Instant::now();
        let plan = {
            let mut entries = self.entries.write();
            let slot = entries
                .entry(key.clone())
                .or_insert_with(|| Slot::new(key.clone()));
            let entry = &mut slot.entry;

            match entry.status {
                QueryStatus::Success => {
                    let stale = refetch_after.is_some_and(|max_age| entry.is_stale(max_age, now));
                    if stale && !entry.is_refetching {
                        entry.is_refetching = true;
                        slot.publish();
                        Plan::Background(slot.entry.clone())
                    } else {
                        Plan::Serve(slot.entry.clone())
                    }
                }
                QueryStatus::Loading => Plan::Attach,
                QueryStatus::Uninitialized | QueryStatus::Error => {
                    entry.status = QueryStatus::Loading;
                    entry.is_refetching = false;
                    slot.publish();
                    Plan::Fetch
                }
            }
        };

        match plan {
            Plan::Serve(entry) => Ensured::Ready(entry),
            Plan::Background(entry) => {
                debug!(key = %key, "Serving stale data while refreshing");
                // The fetch runs detached; dropping the handle does not cancel it.
                drop(fetcher());
                Ensured::Ready(entry)
            }
            Plan::Attach | Plan::Fetch => Ensured::Settling(fetcher()),
        }
    }

    /// Store a successful result and re-associate its tags.
    pub fn write(&self, key: &QueryKey, data: Value, tags: Vec<Tag>) -> CacheEntry {
        let mut entries = self.entries.write();
        let slot = entries
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone()));

        let entry = &mut slot.entry;
        entry.status = QueryStatus::Success;
        entry.data = Some(data);
        entry.error = None;
        entry.is_refetching = false;
        entry.fetched_at = Some(Instant::now());
        entry.provides_tags = tags.iter().cloned().collect();

        self.tags.associate(key, tags);
        slot.publish();
        trace!(key = %key, "Wrote query result");
        slot.entry.clone()
    }

    /// Record a failed fetch. The last good data, if any, is kept.
    pub fn write_error(&self, key: &QueryKey, error: &QueryError) -> CacheEntry {
        self.modify(key, |entry| {
            entry.status = QueryStatus::Error;
            entry.error = Some(ErrorInfo::from(error));
            entry.is_refetching = false;
            entry.clone()
        })
    }

    /// Mark the entry as reloading, e.g. after its tags were invalidated.
    /// Existing data stays readable.
    pub fn mark_loading(&self, key: &QueryKey) {
        self.modify(key, |entry| {
            entry.status = QueryStatus::Loading;
            entry.is_refetching = false;
        });
    }

    /// Flag an explicit refetch: entries with data keep serving it and set
    /// `is_refetching`, entries without data become `loading`.
    pub fn mark_refetching(&self, key: &QueryKey) {
        self.modify(key, |entry| {
            if entry.status == QueryStatus::Success {
                entry.is_refetching = true;
            } else {
                entry.status = QueryStatus::Loading;
            }
        });
    }

    /// Apply `recipe` to the cached data in place.
    ///
    /// Returns `None` without touching anything when the entry has no data.
    pub fn apply_patch<F>(&self, key: &QueryKey, recipe: F) -> Option<InversePatch>
    where
        F: FnOnce(&mut Value),
    {
        let mut entries = self.entries.write();
        let slot = entries.get_mut(key)?;
        let data = slot.entry.data.as_mut()?;

        let previous = data.clone();
        recipe(data);
        slot.entry.pending_patches += 1;
        slot.publish();
        debug!(key = %key, "Applied optimistic patch");

        Some(InversePatch {
            key: key.clone(),
            previous,
        })
    }

    /// Restore the data captured by `inverse`.
    ///
    /// Returns `false` if the entry no longer exists.
    pub fn undo(&self, inverse: InversePatch) -> bool {
        let mut entries = self.entries.write();
        let Some(slot) = entries.get_mut(&inverse.key) else {
            return false;
        };

        slot.entry.data = Some(inverse.previous);
        slot.entry.pending_patches = slot.entry.pending_patches.saturating_sub(1);
        slot.publish();
        debug!(key = %inverse.key, "Rolled back optimistic patch");
        true
    }

    /// Drop an inverse patch whose mutation committed; the patched data
    /// stays until a refetch overwrites it.
    pub fn release(&self, inverse: InversePatch) {
        let mut entries = self.entries.write();
        if let Some(slot) = entries.get_mut(&inverse.key) {
            slot.entry.pending_patches = slot.entry.pending_patches.saturating_sub(1);
            slot.publish();
        }
    }

    /// Increment the subscriber count, returning a receiver for the entry
    /// and the new count.
    ///
    /// Both come from the same slot under one write lock, so an eviction
    /// can never slip in between and leave the receiver on a dropped sender.
    pub fn add_subscriber(&self, key: &QueryKey) -> (watch::Receiver<CacheEntry>, usize) {
        let mut entries = self.entries.write();
        let slot = entries
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone()));
        slot.entry.subscriber_count += 1;
        slot.publish();
        (slot.notifier.subscribe(), slot.entry.subscriber_count)
    }

    /// Decrement the subscriber count, returning the new count.
    pub fn remove_subscriber(&self, key: &QueryKey) -> usize {
        let mut entries = self.entries.write();
        let Some(slot) = entries.get_mut(key) else {
            return 0;
        };
        slot.entry.subscriber_count = slot.entry.subscriber_count.saturating_sub(1);
        slot.publish();
        slot.entry.subscriber_count
    }

    /// Remove the entry if nothing uses it any more.
    pub fn evict_if_unused(&self, key: &QueryKey) -> EvictOutcome {
        let mut entries = self.entries.write();
        let Some(slot) = entries.get(key) else {
            return EvictOutcome::Missing;
        };

        let entry = &slot.entry;
        if entry.subscriber_count > 0 {
            return EvictOutcome::InUse;
        }
        if entry.pending_patches > 0 || entry.is_fetching() {
            return EvictOutcome::Pinned;
        }

        entries.remove(key);
        self.tags.remove(key);
        debug!(key = %key, "Evicted unused entry");
        EvictOutcome::Evicted
    }

    /// Cached keys belonging to `endpoint`.
    pub fn keys_for_endpoint(&self, endpoint: &str) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self
            .entries
            .read()
            .keys()
            .filter(|key| key.endpoint() == endpoint)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn modify<R>(&self, key: &QueryKey, f: impl FnOnce(&mut CacheEntry) -> R) -> R {
        let mut entries = self.entries.write();
        let slot = entries
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone()));
        let result = f(&mut slot.entry);
        slot.publish();
        result
    }
}

enum Plan {
    Serve(CacheEntry),
    Background(CacheEntry),
    Attach,
    Fetch,
}
