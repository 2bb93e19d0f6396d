//! query-store - tag-invalidated query cache for REST resource services
//!
//! A cache keyed by endpoint and normalized arguments, with tag-based
//! invalidation, optimistic mutations with exact rollback, request
//! de-duplication and stale-while-revalidate refreshes.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Cache models, errors and the ports
//!   (`BaseQuery`, `QueryEndpoint`, `MutationEndpoint`)
//! - **Service Layer** (`services`): Cache store, tag index and the query,
//!   mutation and subscription engines
//! - **Application Layer** (`application`): The api client and the users
//!   endpoint set
//! - **Infrastructure Layer** (`infrastructure`): HTTP, configuration, logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use query_store::{ApiClient, UsersApi, ListUsersArgs};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = query_store::ConfigLoader::load()?;
//!     let http = query_store::infrastructure::http::HttpBaseQuery::new(&config.api)?;
//!     let users = UsersApi::new(ApiClient::new(std::sync::Arc::new(http), &config.cache));
//!
//!     let mut list = users.get_users(ListUsersArgs::default())?;
//!     println!("{:?}", list.result().await?);
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{ApiClient, QueryHandle, QueryState, UsersApi};
pub use domain::errors::{ErrorInfo, ErrorKind, QueryError};
pub use domain::models::{
    CacheConfig, CacheEntry, Config, ListUsersArgs, NewUser, QueryKey, QueryStatus, Role, Tag,
    User, UserFilter, UserUpdate,
};
pub use domain::ports::{ApiRequest, BaseQuery, MutationEndpoint, QueryEndpoint};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CacheStore, MutationExecutor, QueryExecutor, SubscriptionManager, TagIndex};
