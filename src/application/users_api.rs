//! Users API: the endpoint definitions of the users service.
//!
//! `getUsers` provides `(User, *)` and `getUser(id)` provides `(User, id)`.
//! Every mutation patches the cached `getUsers` lists optimistically (edits
//! also patch the cached `getUser` record) and invalidates the tags it
//! affects once the server confirms it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::api_client::ApiClient;
use super::query_handle::QueryHandle;
use crate::domain::errors::QueryError;
use crate::domain::models::{
    DeleteResponse, ListUsersArgs, NewUser, Patch, QueryKey, Tag, User, UserUpdate,
    TEMP_ID_PREFIX,
};
use crate::domain::ports::{ApiRequest, MutationEndpoint, QueryEndpoint};
use crate::services::MutationFuture;

/// Tag kind of user resources.
pub const USER_TAG: &str = "User";

const GET_USERS: &str = "getUsers";
const GET_USER: &str = "getUser";

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Patch every cached user list.
fn patch_user_lists<F>(recipe: F) -> Patch
where
    F: Fn(&mut Vec<Value>) + Send + Sync + 'static,
{
    Patch::for_endpoint(GET_USERS, move |data| {
        if let Some(users) = data.as_array_mut() {
            recipe(users);
        }
    })
}

/// Apply `recipe` to user `id` in every cached list and in its cached
/// `getUser` entry.
fn patch_user<F>(id: &str, recipe: F) -> Vec<Patch>
where
    F: Fn(&mut Map<String, Value>) + Clone + Send + Sync + 'static,
{
    let list_id = id.to_string();
    let in_lists = recipe.clone();
    vec![
        patch_user_lists(move |users| {
            if let Some(user) = find_user(users, &list_id) {
                in_lists(user);
            }
        }),
        Patch::for_key(QueryKey::from_value(GET_USER, &json!(id)), move |data| {
            if let Some(user) = data.as_object_mut() {
                recipe(user);
            }
        }),
    ]
}

fn find_user<'a>(users: &'a mut [Value], id: &str) -> Option<&'a mut Map<String, Value>> {
    users
        .iter_mut()
        .filter_map(Value::as_object_mut)
        .find(|user| user.get("_id").and_then(Value::as_str) == Some(id))
}

/// `GET /users`: one page of users.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetUsers;

impl QueryEndpoint for GetUsers {
    type Args = ListUsersArgs;
    type Output = Vec<User>;

    fn name(&self) -> &'static str {
        GET_USERS
    }

    fn request(&self, args: &ListUsersArgs) -> ApiRequest {
        let mut request = ApiRequest::get("/users")
            .with_param("page", args.page)
            .with_param("limit", args.limit);
        if let Some(role) = args.role {
            request = request.with_param("role", role);
        }
        if let Some(search) = args.search.as_deref().filter(|s| !s.is_empty()) {
            request = request.with_param("search", search);
        }
        request
    }

    /// Keeps only the `users` array of the page; a page without one is an
    /// empty list.
    fn transform_response(&self, raw: Value) -> Result<Value, QueryError> {
        let mut page = match raw {
            Value::Object(page) => page,
            other => {
                return Err(QueryError::Transform(format!(
                    "expected a user page object, got {}",
                    json_type(&other)
                )))
            }
        };
        match page.remove("users") {
            None | Some(Value::Null) => Ok(Value::Array(Vec::new())),
            Some(users @ Value::Array(_)) => Ok(users),
            Some(other) => Err(QueryError::Transform(format!(
                "expected `users` to be an array, got {}",
                json_type(&other)
            ))),
        }
    }

    fn provides_tags(&self, _data: &Value, _args: &ListUsersArgs) -> Vec<Tag> {
        vec![Tag::kind_of(USER_TAG)]
    }
}

/// `GET /users/:id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetUser;

impl QueryEndpoint for GetUser {
    type Args = String;
    type Output = User;

    fn name(&self) -> &'static str {
        GET_USER
    }

    fn request(&self, id: &String) -> ApiRequest {
        ApiRequest::get(format!("/users/{id}"))
    }

    fn provides_tags(&self, _data: &Value, id: &String) -> Vec<Tag> {
        vec![Tag::instance(USER_TAG, id)]
    }
}

/// `POST /users`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddUser;

impl MutationEndpoint for AddUser {
    type Args = NewUser;
    type Output = User;

    fn name(&self) -> &'static str {
        "addUser"
    }

    fn request(&self, user: &NewUser) -> ApiRequest {
        ApiRequest::post("/users", json!(user))
    }

    fn invalidates_tags(&self, _response: &Value, _user: &NewUser) -> Vec<Tag> {
        vec![Tag::kind_of(USER_TAG)]
    }

    /// Appends a placeholder with a temporary id to every cached list.
    fn optimistic_patches(&self, user: &NewUser) -> Vec<Patch> {
        let now = now_rfc3339();
        let placeholder = json!({
            "_id": format!("{TEMP_ID_PREFIX}{}", Utc::now().timestamp_millis()),
            "name": user.name,
            "email": user.email,
            "role": user.role,
            "isActive": true,
            "createdAt": now,
            "updatedAt": now,
        });
        vec![patch_user_lists(move |users| users.push(placeholder.clone()))]
    }
}

/// Arguments of [`UpdateUser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserArgs {
    pub id: String,
    pub changes: UserUpdate,
}

/// `PUT /users/:id` with a partial update.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateUser;

impl MutationEndpoint for UpdateUser {
    type Args = UpdateUserArgs;
    type Output = User;

    fn name(&self) -> &'static str {
        "updateUser"
    }

    fn request(&self, args: &UpdateUserArgs) -> ApiRequest {
        ApiRequest::put(format!("/users/{}", args.id), json!(args.changes))
    }

    fn invalidates_tags(&self, _response: &Value, args: &UpdateUserArgs) -> Vec<Tag> {
        vec![Tag::instance(USER_TAG, &args.id)]
    }

    fn optimistic_patches(&self, args: &UpdateUserArgs) -> Vec<Patch> {
        let Value::Object(changes) = json!(args.changes) else {
            return Vec::new();
        };
        let now = now_rfc3339();

        patch_user(&args.id, move |user| {
            for (field, value) in &changes {
                user.insert(field.clone(), value.clone());
            }
            user.insert("updatedAt".into(), json!(now));
        })
    }
}

/// `PUT /users/:id` flipping `isActive`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToggleUser;

impl MutationEndpoint for ToggleUser {
    type Args = User;
    type Output = User;

    fn name(&self) -> &'static str {
        "toggleUser"
    }

    fn request(&self, user: &User) -> ApiRequest {
        let mut body = json!(user);
        body["isActive"] = json!(!user.is_active);
        ApiRequest::put(format!("/users/{}", user.id), body)
    }

    fn invalidates_tags(&self, _response: &Value, user: &User) -> Vec<Tag> {
        vec![Tag::instance(USER_TAG, &user.id)]
    }

    fn optimistic_patches(&self, user: &User) -> Vec<Patch> {
        let now = now_rfc3339();

        patch_user(&user.id, move |user| {
            let active = user.get("isActive").and_then(Value::as_bool).unwrap_or(true);
            user.insert("isActive".into(), json!(!active));
            user.insert("updatedAt".into(), json!(now));
        })
    }
}

/// `DELETE /users/:id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteUser;

impl MutationEndpoint for DeleteUser {
    type Args = String;
    type Output = DeleteResponse;

    fn name(&self) -> &'static str {
        "deleteUser"
    }

    fn request(&self, id: &String) -> ApiRequest {
        ApiRequest::delete(format!("/users/{id}"))
    }

    fn invalidates_tags(&self, _response: &Value, _id: &String) -> Vec<Tag> {
        vec![Tag::kind_of(USER_TAG)]
    }

    fn optimistic_patches(&self, id: &String) -> Vec<Patch> {
        let id = id.clone();
        vec![patch_user_lists(move |users| {
            users.retain(|user| user.get("_id").and_then(Value::as_str) != Some(id.as_str()));
        })]
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Typed facade over the users endpoints.
#[derive(Debug, Clone)]
pub struct UsersApi {
    client: ApiClient,
}

impl UsersApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn get_users(&self, args: ListUsersArgs) -> Result<QueryHandle<Vec<User>>, QueryError> {
        self.client.subscribe(Arc::new(GetUsers), args)
    }

    pub fn get_user(&self, id: impl Into<String>) -> Result<QueryHandle<User>, QueryError> {
        self.client.subscribe(Arc::new(GetUser), id.into())
    }

    /// One-shot list fetch.
    pub async fn list_users(&self, args: ListUsersArgs) -> Result<Vec<User>, QueryError> {
        self.client.query(Arc::new(GetUsers), args).await
    }

    /// One-shot single fetch.
    pub async fn fetch_user(&self, id: impl Into<String>) -> Result<User, QueryError> {
        self.client.query(Arc::new(GetUser), id.into()).await
    }

    pub fn add_user(&self, user: NewUser) -> MutationFuture<User> {
        self.client.mutate(Arc::new(AddUser), user)
    }

    pub fn update_user(&self, id: impl Into<String>, changes: UserUpdate) -> MutationFuture<User> {
        self.client.mutate(
            Arc::new(UpdateUser),
            UpdateUserArgs {
                id: id.into(),
                changes,
            },
        )
    }

    pub fn toggle_user(&self, user: User) -> MutationFuture<User> {
        self.client.mutate(Arc::new(ToggleUser), user)
    }

    pub fn delete_user(&self, id: impl Into<String>) -> MutationFuture<DeleteResponse> {
        self.client.mutate(Arc::new(DeleteUser), id.into())
    }
}
