//! Typed views over type-erased cache entries.

use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::domain::errors::{ErrorInfo, QueryError};
use crate::domain::models::{CacheEntry, QueryKey, QueryStatus};
use crate::services::{InFlightFetch, QueryExecutor, QuerySubscription};

/// Snapshot of a query as seen by a consumer expecting `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<ErrorInfo>,
    /// A fetch for the key is running, either the first load or a refresh.
    pub is_fetching: bool,
}

impl<T: DeserializeOwned> QueryState<T> {
    /// Decode `entry`. Data that does not match `T` turns the state into an
    /// `error` carrying a transform error.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        match entry.decode::<T>() {
            Ok(data) => Self {
                status: entry.status,
                data,
                error: entry.error.clone(),
                is_fetching: entry.is_fetching(),
            },
            Err(err) => Self {
                status: QueryStatus::Error,
                data: None,
                error: Some(ErrorInfo::from(&err)),
                is_fetching: entry.is_fetching(),
            },
        }
    }
}

impl<T> QueryState<T> {
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading && self.data.is_none()
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// The data of a successful query, or its error.
    pub fn into_result(self) -> Result<T, QueryError> {
        match (self.status, self.data, self.error) {
            (QueryStatus::Success, Some(data), _) => Ok(data),
            (_, _, Some(error)) => Err(QueryError::from(error)),
            (status, _, None) => Err(QueryError::Transform(format!("query is {status}, no data available"))),
        }
    }
}

/// A subscribed query with a typed view of its data.
///
/// Holding the handle keeps the entry alive; dropping it unsubscribes.
pub struct QueryHandle<T> {
    subscription: QuerySubscription,
    executor: QueryExecutor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> QueryHandle<T> {
    pub(crate) fn new(subscription: QuerySubscription, executor: QueryExecutor) -> Self {
        Self {
            subscription,
            executor,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &QueryKey {
        self.subscription.key()
    }

    /// Current state without waiting.
    pub fn state(&self) -> QueryState<T> {
        QueryState::from_entry(&self.subscription.entry())
    }

    /// Raw cache entry.
    pub fn entry(&self) -> CacheEntry {
        self.subscription.entry()
    }

    /// Wait for the next change. `None` once the entry is gone.
    pub async fn changed(&mut self) -> Option<QueryState<T>> {
        let entry = self.subscription.changed().await?;
        Some(QueryState::from_entry(&entry))
    }

    /// Wait until the query settles and no refresh is running.
    pub async fn settled(&mut self) -> QueryState<T> {
        QueryState::from_entry(&self.subscription.settled().await)
    }

    /// Wait for settlement and return the data or the error.
    pub async fn result(&mut self) -> Result<T, QueryError> {
        self.settled().await.into_result()
    }

    /// Re-run the query; cached data keeps being served meanwhile.
    pub fn refetch(&self) -> Option<InFlightFetch> {
        self.executor.refetch(self.key())
    }
}

impl<T> std::fmt::Debug for QueryHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("key", self.subscription.key())
            .finish_non_exhaustive()
    }
}
