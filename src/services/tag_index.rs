//! Tag index: which cached queries provide which invalidation tags.
//!
//! Holds only keys, never entry data. A key is listed under a tag exactly
//! when its most recent successful fetch declared that tag.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::trace;

use crate::domain::models::{QueryKey, Tag};

/// Keys per provided tag, for the tags of one kind.
#[derive(Debug, Default)]
struct KindBucket {
    providers: HashMap<Tag, HashSet<QueryKey>>,
}

impl KindBucket {
    fn insert(&mut self, tag: &Tag, key: &QueryKey) {
        self.providers
            .entry(tag.clone())
            .or_default()
            .insert(key.clone());
    }

    fn remove(&mut self, tag: &Tag, key: &QueryKey) {
        if let Some(keys) = self.providers.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                self.providers.remove(tag);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[derive(Debug, Default)]
struct Inner {
    by_kind: HashMap<String, KindBucket>,
    provided: HashMap<QueryKey, BTreeSet<Tag>>,
}

impl Inner {
    fn detach(&mut self, key: &QueryKey) -> Option<BTreeSet<Tag>> {
        let previous = self.provided.remove(key)?;
        for tag in &previous {
            if let Some(bucket) = self.by_kind.get_mut(tag.kind()) {
                bucket.remove(tag, key);
                if bucket.is_empty() {
                    self.by_kind.remove(tag.kind());
                }
            }
        }
        Some(previous)
    }
}

/// Mapping from tag to the set of keys currently providing it.
#[derive(Debug, Default)]
pub struct TagIndex {
    inner: RwLock<Inner>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tag set of `key`. Readers never see the key half moved:
    /// removal and insertion happen under one write lock.
    pub fn associate(&self, key: &QueryKey, tags: impl IntoIterator<Item = Tag>) {
        let tags: BTreeSet<Tag> = tags.into_iter().collect();
        let mut inner = self.inner.write();
        inner.detach(key);

        if tags.is_empty() {
            return;
        }
        for tag in &tags {
            inner
                .by_kind
                .entry(tag.kind().to_string())
                .or_default()
                .insert(tag, key);
        }
        trace!(key = %key, tags = tags.len(), "Associated tags");
        inner.provided.insert(key.clone(), tags);
    }

    /// Forget every association of `key`.
    pub fn remove(&self, key: &QueryKey) {
        self.inner.write().detach(key);
    }

    /// Keys affected by invalidating any of `tags`.
    ///
    /// Pure lookup; refetching the returned keys is the caller's job.
    pub fn invalidate(&self, tags: &[Tag]) -> BTreeSet<QueryKey> {
        let inner = self.inner.read();
        let mut affected = BTreeSet::new();

        for tag in tags {
            let Some(bucket) = inner.by_kind.get(tag.kind()) else {
                continue;
            };
            for (provided, keys) in &bucket.providers {
                if tag.invalidates(provided) {
                    affected.extend(keys.iter().cloned());
                }
            }
        }

        affected
    }

    /// Tags currently provided by `key`.
    pub fn tags_for(&self, key: &QueryKey) -> BTreeSet<Tag> {
        self.inner
            .read()
            .provided
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of keys with at least one tag.
    pub fn len(&self) -> usize {
        self.inner.read().provided.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
