//! Common test utilities for integration tests
//!
//! Provides an in-memory users service with the mock backend's semantics
//! (pagination, search, 201 on create, 404 on unknown ids, 400 on duplicate
//! emails), per-request counters, injectable latency and failures.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use query_store::domain::models::CacheConfig;
use query_store::domain::ports::{ApiRequest, BaseQuery, HttpMethod};
use query_store::{ApiClient, QueryError, UsersApi};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// The four users the mock backend starts with.
pub fn seed_users() -> Vec<Value> {
    vec![
        json!({"_id": "1", "name": "John Doe", "email": "john@example.com", "role": "admin", "isActive": true,
               "createdAt": "2024-01-01T00:00:00.000Z", "updatedAt": "2024-01-01T00:00:00.000Z"}),
        json!({"_id": "2", "name": "Jane Smith", "email": "jane@example.com", "role": "user", "isActive": true,
               "createdAt": "2024-01-02T00:00:00.000Z", "updatedAt": "2024-01-02T00:00:00.000Z"}),
        json!({"_id": "3", "name": "Bob Johnson", "email": "bob@example.com", "role": "user", "isActive": true,
               "createdAt": "2024-01-03T00:00:00.000Z", "updatedAt": "2024-01-03T00:00:00.000Z"}),
        json!({"_id": "4", "name": "Alice Brown", "email": "alice@example.com", "role": "user", "isActive": false,
               "createdAt": "2024-01-04T00:00:00.000Z", "updatedAt": "2024-01-04T00:00:00.000Z"}),
    ]
}

struct Store {
    users: Vec<Value>,
    next_id: u64,
}

/// In-memory users service.
pub struct FakeUsersBackend {
    store: Mutex<Store>,
    latency: Duration,
    requests: Mutex<Vec<ApiRequest>>,
    failures: Mutex<VecDeque<(HttpMethod, QueryError)>>,
}

impl FakeUsersBackend {
    pub fn new() -> Arc<Self> {
        Self::with_users(seed_users())
    }

    pub fn with_users(users: Vec<Value>) -> Arc<Self> {
        Self::build(users, Duration::from_millis(50))
    }

    pub fn build(users: Vec<Value>, latency: Duration) -> Arc<Self> {
        let next_id = users.len() as u64 + 1;
        Arc::new(Self {
            store: Mutex::new(Store { users, next_id }),
            latency,
            requests: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
        })
    }

    /// Make the next request with `method` fail with `error`.
    pub fn fail_next(&self, method: HttpMethod, error: QueryError) {
        self.failures.lock().push_back((method, error));
    }

    /// Number of requests seen with `method` whose path starts with `path`.
    pub fn calls(&self, method: HttpMethod, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.method == method && request.path.starts_with(path))
            .count()
    }

    pub fn list_calls(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.method == HttpMethod::Get && request.path == "/users")
            .count()
    }

    /// Write a user directly, as another client would.
    pub fn insert_user(&self, user: Value) {
        let mut store = self.store.lock();
        store.next_id += 1;
        store.users.push(user);
    }

    pub fn users(&self) -> Vec<Value> {
        self.store.lock().users.clone()
    }

    fn take_failure(&self, method: HttpMethod) -> Option<QueryError> {
        let mut failures = self.failures.lock();
        let index = failures.iter().position(|(m, _)| *m == method)?;
        failures.remove(index).map(|(_, error)| error)
    }

    fn route(&self, request: &ApiRequest) -> Result<Value, QueryError> {
        let segments: Vec<&str> = request.path.trim_start_matches('/').split('/').collect();
        let mut store = self.store.lock();

        match (request.method, segments.as_slice()) {
            (HttpMethod::Get, ["users"]) => Ok(list(&store.users, request)),
            (HttpMethod::Get, ["users", id]) => find(&store.users, id).cloned().ok_or_else(not_found),
            (HttpMethod::Post, ["users"]) => {
                let body = request.body.clone().unwrap_or(Value::Null);
                let email = body.get("email").cloned().unwrap_or(Value::Null);
                if store.users.iter().any(|user| user.get("email") == Some(&email)) {
                    return Err(QueryError::http(400, "User with this email already exists"));
                }

                let now = Utc::now().to_rfc3339();
                let user = json!({
                    "_id": store.next_id.to_string(),
                    "name": body.get("name").cloned().unwrap_or(Value::Null),
                    "email": email,
                    "role": body.get("role").filter(|r| truthy(r)).cloned().unwrap_or(json!("user")),
                    "isActive": true,
                    "createdAt": now,
                    "updatedAt": now,
                });
                store.next_id += 1;
                store.users.push(user.clone());
                Ok(user)
            }
            (HttpMethod::Put, ["users", id]) => {
                let body = request.body.clone().unwrap_or(Value::Null);
                let user = store
                    .users
                    .iter_mut()
                    .find(|user| user.get("_id").and_then(Value::as_str) == Some(*id))
                    .ok_or_else(not_found)?;

                for field in ["name", "email", "role"] {
                    if let Some(value) = body.get(field).filter(|v| truthy(v)) {
                        user[field] = value.clone();
                    }
                }
                if let Some(active) = body.get("isActive").filter(|v| !v.is_null()) {
                    user["isActive"] = active.clone();
                }
                user["updatedAt"] = json!(Utc::now().to_rfc3339());
                Ok(user.clone())
            }
            (HttpMethod::Delete, ["users", id]) => {
                let before = store.users.len();
                store
                    .users
                    .retain(|user| user.get("_id").and_then(Value::as_str) != Some(*id));
                if store.users.len() == before {
                    return Err(not_found());
                }
                Ok(json!({"message": "User deleted successfully"}))
            }
            _ => Err(QueryError::http(404, "Route not found")),
        }
    }
}

#[async_trait]
impl BaseQuery for FakeUsersBackend {
    async fn execute(&self, request: ApiRequest) -> Result<Value, QueryError> {
        self.requests.lock().push(request.clone());

        // The response reflects the state at arrival, like a server that
        // answers slowly.
        let response = match self.take_failure(request.method) {
            Some(error) => Err(error),
            None => self.route(&request),
        };
        tokio::time::sleep(self.latency).await;
        response
    }
}

fn not_found() -> QueryError {
    QueryError::http(404, "User not found")
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn find<'a>(users: &'a [Value], id: &str) -> Option<&'a Value> {
    users
        .iter()
        .find(|user| user.get("_id").and_then(Value::as_str) == Some(id))
}

fn created_at(user: &Value) -> DateTime<Utc> {
    user.get("createdAt")
        .and_then(Value::as_str)
        .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
        .map_or(DateTime::<Utc>::MIN_UTC, |at| at.with_timezone(&Utc))
}

/// Search, filter, sort newest first and paginate.
fn list(users: &[Value], request: &ApiRequest) -> Value {
    let page: usize = request.param("page").and_then(|p| p.parse().ok()).unwrap_or(1).max(1);
    let limit: usize = request.param("limit").and_then(|l| l.parse().ok()).unwrap_or(10).max(1);

    let mut matching: Vec<&Value> = users
        .iter()
        .filter(|user| match request.param("search").filter(|s| !s.is_empty()) {
            Some(search) => ["name", "email"].iter().any(|field| {
                user.get(*field)
                    .and_then(Value::as_str)
                    .is_some_and(|text| text.to_lowercase().contains(&search.to_lowercase()))
            }),
            None => true,
        })
        .filter(|user| match request.param("role") {
            Some(role) => user.get("role").and_then(Value::as_str) == Some(role),
            None => true,
        })
        .collect();
    matching.sort_by_key(|user| std::cmp::Reverse(created_at(user)));

    let total = matching.len();
    let page_users: Vec<Value> = matching
        .into_iter()
        .skip((page - 1) * limit)
        .take(limit)
        .cloned()
        .collect();

    json!({
        "users": page_users,
        "totalPages": total.div_ceil(limit),
        "currentPage": page,
        "total": total,
    })
}

/// Cache lifetimes used by the integration tests.
pub fn cache_config() -> CacheConfig {
    CacheConfig {
        keep_unused_for_secs: 60,
        refetch_stale_after_secs: 30,
    }
}

pub fn users_api(backend: &Arc<FakeUsersBackend>) -> UsersApi {
    UsersApi::new(ApiClient::new(backend.clone(), &cache_config()))
}

/// Ids of a user list, in order.
pub fn ids(users: &[query_store::User]) -> Vec<String> {
    users.iter().map(|user| user.id.clone()).collect()
}
