//! Integration tests for the query side of the cache: de-duplication,
//! transform and tags, stale-while-revalidate, error handling and eviction.
//!
//! All tests run on a paused clock; the fake backend answers after 50ms of
//! virtual time.

mod common;

use common::{ids, users_api, FakeUsersBackend};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use query_store::application::GetUsers;
use query_store::domain::ports::HttpMethod;
use query_store::{
    ApiClient, CacheConfig, ErrorKind, ListUsersArgs, QueryError, QueryKey, QueryStatus, Tag,
};

#[tokio::test(start_paused = true)]
async fn test_concurrent_subscribers_share_one_request() {
    common::setup_test_logging();
    let backend = FakeUsersBackend::new();
    let api = users_api(&backend);

    let mut first = api.get_users(ListUsersArgs::default()).unwrap();
    let mut second = api.get_users(ListUsersArgs::default()).unwrap();
    assert_eq!(first.key(), second.key());

    let (a, b) = tokio::join!(first.result(), second.result());
    assert_eq!(ids(&a.unwrap()), vec!["4", "3", "2", "1"]);
    assert_eq!(ids(&b.unwrap()), vec!["4", "3", "2", "1"]);
    assert_eq!(backend.list_calls(), 1, "Both subscribers must share one GET");
    assert_eq!(api.client().network_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_equivalent_args_share_a_key() {
    let backend = FakeUsersBackend::new();
    let api = users_api(&backend);

    let explicit = ListUsersArgs {
        page: 1,
        limit: 10,
        role: None,
        search: None,
    };
    let mut first = api.get_users(explicit).unwrap();
    let mut second = api.get_users(ListUsersArgs::default()).unwrap();
    first.result().await.unwrap();
    second.result().await.unwrap();

    assert_eq!(backend.list_calls(), 1);
    assert_eq!(
        QueryKey::from_value("getUsers", &json!({"limit": 10, "page": 1, "search": null})),
        QueryKey::from_value("getUsers", &json!({"page": 1, "limit": 10})),
    );
}

#[tokio::test(start_paused = true)]
async fn test_different_args_are_cached_separately() {
    let backend = FakeUsersBackend::new();
    let api = users_api(&backend);

    let admins = ListUsersArgs {
        role: Some(query_store::Role::Admin),
        ..ListUsersArgs::default()
    };
    let all = api.list_users(ListUsersArgs::default()).await.unwrap();
    let only_admins = api.list_users(admins).await.unwrap();

    assert_eq!(all.len(), 4);
    assert_eq!(ids(&only_admins), vec!["1"]);
    assert_eq!(backend.list_calls(), 2);
    assert_eq!(api.client().store().keys_for_endpoint("getUsers").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_list_is_transformed_and_tagged() {
    let backend = FakeUsersBackend::with_users(vec![json!({"_id": "1", "name": "John"})]);
    let api = users_api(&backend);

    let mut handle = api.get_users(ListUsersArgs::default()).unwrap();
    handle.settled().await;

    let entry = handle.entry();
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(entry.data, Some(json!([{"_id": "1", "name": "John"}])));
    assert_eq!(entry.provides_tags.into_iter().collect::<Vec<_>>(), vec![Tag::kind_of("User")]);
}

#[tokio::test(start_paused = true)]
async fn test_loading_then_success_transitions() {
    let backend = FakeUsersBackend::new();
    let api = users_api(&backend);

    let mut handle = api.get_users(ListUsersArgs::default()).unwrap();
    let state = handle.state();
    assert!(state.is_loading());
    assert!(state.is_fetching);

    let state = handle.settled().await;
    assert!(state.is_success());
    assert!(!state.is_fetching);
    assert_eq!(state.data.map(|users| users.len()), Some(4));
}

#[tokio::test(start_paused = true)]
async fn test_stale_data_is_served_while_revalidating() {
    let backend = FakeUsersBackend::new();
    let api = users_api(&backend);

    let mut first = api.get_users(ListUsersArgs::default()).unwrap();
    first.result().await.unwrap();

    // Past the 30s freshness threshold.
    tokio::time::sleep(Duration::from_secs(31)).await;

    let mut second = api.get_users(ListUsersArgs::default()).unwrap();
    let state = second.state();
    assert!(state.is_success(), "Stale data stays in success");
    assert!(state.is_fetching);
    assert_eq!(state.data.map(|users| users.len()), Some(4));

    let state = second.settled().await;
    assert!(!state.is_fetching);
    assert_eq!(backend.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_data_is_not_refetched() {
    let backend = FakeUsersBackend::new();
    let api = users_api(&backend);

    let mut first = api.get_users(ListUsersArgs::default()).unwrap();
    first.result().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let second = api.get_users(ListUsersArgs::default()).unwrap();
    assert!(!second.state().is_fetching);
    assert_eq!(backend.list_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_is_not_retried() {
    let backend = FakeUsersBackend::new();
    backend.fail_next(HttpMethod::Get, QueryError::Network("connection refused".into()));
    let api = users_api(&backend);

    let mut handle = api.get_users(ListUsersArgs::default()).unwrap();
    let err = handle.result().await.unwrap_err();
    assert_eq!(err, QueryError::Network("connection refused".into()));

    let state = handle.state();
    assert!(state.is_error());
    assert_eq!(state.error.map(|e| e.kind), Some(ErrorKind::Network));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.list_calls(), 1, "Errors must not trigger automatic retries");

    // An explicit refetch does retry.
    handle.refetch().unwrap().await;
    assert!(handle.state().is_success());
    assert_eq!(backend.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_new_subscriber_retries_errored_entry() {
    let backend = FakeUsersBackend::new();
    backend.fail_next(HttpMethod::Get, QueryError::http(500, "Internal server error"));
    let api = users_api(&backend);

    let mut failed = api.get_users(ListUsersArgs::default()).unwrap();
    let err = failed.result().await.unwrap_err();
    assert_eq!(err.status(), Some(500));

    let mut retry = api.get_users(ListUsersArgs::default()).unwrap();
    assert_eq!(retry.result().await.unwrap().len(), 4);
    assert_eq!(backend.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_user_settles_with_http_error() {
    let backend = FakeUsersBackend::new();
    let api = users_api(&backend);

    let err = api.fetch_user("99").await.unwrap_err();
    assert_eq!(err, QueryError::http(404, "User not found"));
}

#[tokio::test(start_paused = true)]
async fn test_unused_entry_is_evicted_after_window() {
    let backend = FakeUsersBackend::new();
    let api = users_api(&backend);
    let args = ListUsersArgs::default();

    let mut handle = api.get_users(args.clone()).unwrap();
    handle.result().await.unwrap();
    let key = handle.key().clone();
    drop(handle);

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(api.client().read(&GetUsers, &args).unwrap().status, QueryStatus::Success);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(api.client().read(&GetUsers, &args).unwrap().status, QueryStatus::Uninitialized);
    assert!(!api.client().store().contains(&key));
    assert!(api.client().store().tag_index().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_within_window_keeps_entry() {
    let backend = FakeUsersBackend::new();
    let api = users_api(&backend);

    let mut handle = api.get_users(ListUsersArgs::default()).unwrap();
    handle.result().await.unwrap();
    drop(handle);

    tokio::time::sleep(Duration::from_secs(20)).await;
    let again = api.get_users(ListUsersArgs::default()).unwrap();
    assert!(again.state().is_success());

    // The first eviction timer was cancelled by the new subscription.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(again.state().is_success());
    assert_eq!(backend.list_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_query_keeps_data_cached() {
    let backend = FakeUsersBackend::new();
    let client = ApiClient::new(
        backend.clone(),
        &CacheConfig {
            keep_unused_for_secs: 5,
            refetch_stale_after_secs: 0,
        },
    );

    let users = client
        .query(Arc::new(GetUsers), ListUsersArgs::default())
        .await
        .unwrap();
    assert_eq!(users.len(), 4);
    assert_eq!(
        client.read(&GetUsers, &ListUsersArgs::default()).unwrap().status,
        QueryStatus::Success
    );

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(client.store().is_empty());
}
