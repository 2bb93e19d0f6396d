//! Cache engine services.

pub mod cache_store;
pub mod mutation_executor;
pub mod query_executor;
pub mod subscription_manager;
pub mod tag_index;

pub use cache_store::{CacheStore, Ensured, EvictOutcome, InFlightFetch, InversePatch};
pub use mutation_executor::{MutationExecutor, MutationFuture, PendingMutation, SettlementState};
pub use query_executor::QueryExecutor;
pub use subscription_manager::{QuerySubscription, SubscriptionManager};
pub use tag_index::TagIndex;
