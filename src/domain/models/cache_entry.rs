//! Cache entry state.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tokio::time::Instant;

use super::{QueryKey, Tag};
use crate::domain::errors::{ErrorInfo, QueryError};

/// Lifecycle status of a cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Uninitialized,
    Loading,
    Success,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Whether the query has settled at least once since it last started.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the cache knows about one query key.
///
/// `status == Success` implies `data` is present and `status == Error`
/// implies `error` is present. `data` survives a later error or reload so
/// consumers can keep showing the last good value.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub status: QueryStatus,
    pub data: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub subscriber_count: usize,
    /// When the current `data` was fetched.
    pub fetched_at: Option<Instant>,
    pub provides_tags: BTreeSet<Tag>,
    /// A background refresh is running while stale data is served.
    pub is_refetching: bool,
    /// Optimistic patches applied to `data` that have not settled yet.
    pub pending_patches: usize,
}

impl CacheEntry {
    pub fn uninitialized(key: QueryKey) -> Self {
        Self {
            key,
            status: QueryStatus::Uninitialized,
            data: None,
            error: None,
            subscriber_count: 0,
            fetched_at: None,
            provides_tags: BTreeSet::new(),
            is_refetching: false,
            pending_patches: 0,
        }
    }

    /// Loading or refreshing in the background.
    pub fn is_fetching(&self) -> bool {
        self.status == QueryStatus::Loading || self.is_refetching
    }

    /// Whether `data` is older than `max_age`. Entries without data are
    /// always stale.
    pub fn is_stale(&self, max_age: std::time::Duration, now: Instant) -> bool {
        self.fetched_at
            .map_or(true, |fetched_at| now.saturating_duration_since(fetched_at) >= max_age)
    }

    /// Deserialize the cached data into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>, QueryError> {
        self.data
            .as_ref()
            .map(|data| serde_json::from_value(data.clone()))
            .transpose()
            .map_err(QueryError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn key() -> QueryKey {
        QueryKey::from_value("getUsers", &json!({"page": 1}))
    }

    #[test]
    fn test_uninitialized_entry() {
        let entry = CacheEntry::uninitialized(key());
        assert_eq!(entry.status, QueryStatus::Uninitialized);
        assert!(entry.data.is_none());
        assert!(!entry.is_fetching());
        assert!(entry.is_stale(Duration::from_secs(60), Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_follows_fetched_at() {
        let mut entry = CacheEntry::uninitialized(key());
        entry.fetched_at = Some(Instant::now());

        assert!(!entry.is_stale(Duration::from_secs(30), Instant::now()));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(entry.is_stale(Duration::from_secs(30), Instant::now()));
    }

    #[test]
    fn test_decode_typed_data() {
        let mut entry = CacheEntry::uninitialized(key());
        entry.data = Some(json!([1, 2, 3]));

        let numbers: Option<Vec<u32>> = entry.decode().unwrap();
        assert_eq!(numbers, Some(vec![1, 2, 3]));

        let err = entry.decode::<String>().unwrap_err();
        assert!(matches!(err, QueryError::Transform(_)));
    }
}
