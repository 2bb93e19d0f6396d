//! Domain models for the query cache and the users resource.

pub mod cache_entry;
pub mod config;
pub mod patch;
pub mod query_key;
pub mod tag;
pub mod user;

pub use cache_entry::{CacheEntry, QueryStatus};
pub use config::{ApiConfig, CacheConfig, Config, LogFormat, LoggingConfig, RotationPolicy};
pub use patch::{Patch, PatchTarget, Recipe};
pub use query_key::QueryKey;
pub use tag::Tag;
pub use user::{
    DeleteResponse, ListUsersArgs, NewUser, Role, User, UserFilter, UserListPage, UserUpdate,
    TEMP_ID_PREFIX,
};
