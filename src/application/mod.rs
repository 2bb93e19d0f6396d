//! Application layer: the api client and the users endpoint set.

pub mod api_client;
pub mod query_handle;
pub mod users_api;

pub use api_client::ApiClient;
pub use query_handle::{QueryHandle, QueryState};
pub use users_api::{
    AddUser, DeleteUser, GetUser, GetUsers, ToggleUser, UpdateUser, UpdateUserArgs, UsersApi,
    USER_TAG,
};
