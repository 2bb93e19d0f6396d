//! Users CLI commands.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::time::Duration;

use crate::application::UsersApi;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::errors::ErrorInfo;
use crate::domain::models::{ListUsersArgs, NewUser, QueryStatus, Role, User, UserFilter, UserUpdate};

#[derive(Args, Debug)]
pub struct UsersArgs {
    #[command(subcommand)]
    pub command: UsersCommands,
}

#[derive(Args, Debug, Clone)]
pub struct ListOptions {
    /// Page number
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    /// Users per page
    #[arg(long, default_value_t = 10)]
    pub limit: u32,
    /// Server-side role filter (user, admin)
    #[arg(long)]
    pub role: Option<Role>,
    /// Server-side search over name and email
    #[arg(short, long)]
    pub search: Option<String>,
    /// Client-side filter (all, active, inactive, admin)
    #[arg(short, long, default_value = "all")]
    pub filter: UserFilter,
}

impl ListOptions {
    fn query_args(&self) -> ListUsersArgs {
        ListUsersArgs {
            page: self.page,
            limit: self.limit,
            role: self.role,
            search: self.search.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum UsersCommands {
    /// List users
    List(ListOptions),
    /// Show one user
    Get {
        /// User id
        id: String,
    },
    /// Create a user
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        /// Role (user, admin)
        #[arg(short, long, default_value = "user")]
        role: Role,
    },
    /// Update fields of a user
    Update {
        /// User id
        id: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        email: Option<String>,
        #[arg(short, long)]
        role: Option<Role>,
        /// Set the active flag
        #[arg(long)]
        active: Option<bool>,
    },
    /// Flip a user between active and inactive
    Toggle {
        /// User id
        id: String,
    },
    /// Delete a user
    Delete {
        /// User id
        id: String,
    },
    /// Follow the cached user list and print every change
    Watch {
        #[command(flatten)]
        list: ListOptions,
        /// Stop after this many seconds
        #[arg(long, default_value_t = 60)]
        seconds: u64,
        /// Refetch the list every N seconds (0 = never)
        #[arg(long, default_value_t = 10)]
        refetch_every: u64,
    },
}

#[derive(Debug, Serialize)]
pub struct UserListOutput {
    pub users: Vec<User>,
    pub filter: UserFilter,
    pub total: usize,
}

impl CommandOutput for UserListOutput {
    fn to_human(&self) -> String {
        if self.users.is_empty() {
            return "No users found.".to_string();
        }

        let users: Vec<&User> = self.users.iter().collect();
        let mut lines = vec![TableFormatter::new().format_users(&users)];
        lines.push(format!(
            "\nShowing {} user{}",
            self.total,
            if self.total == 1 { "" } else { "s" }
        ));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct UserDetailOutput {
    pub user: User,
}

impl CommandOutput for UserDetailOutput {
    fn to_human(&self) -> String {
        TableFormatter::new().format_user(&self.user)
    }
}

#[derive(Debug, Serialize)]
pub struct UserActionOutput {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl CommandOutput for UserActionOutput {
    fn to_human(&self) -> String {
        match &self.user {
            Some(user) => format!("{}\n{}", self.message, TableFormatter::new().format_user(user)),
            None => self.message.clone(),
        }
    }
}

/// One observed state of the watched list.
#[derive(Debug, Serialize)]
pub struct WatchEventOutput {
    pub status: QueryStatus,
    pub is_fetching: bool,
    pub users: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl CommandOutput for WatchEventOutput {
    fn to_human(&self) -> String {
        let mut line = format!("[{}]", self.status);
        if let Some(count) = self.users {
            line.push_str(&format!(" {count} user(s)"));
        }
        if self.is_fetching {
            line.push_str(" (fetching)");
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(" {error}"));
        }
        line
    }
}

pub async fn execute(args: UsersArgs, api: &UsersApi, json_mode: bool) -> Result<()> {
    match args.command {
        UsersCommands::List(options) => {
            let users = api
                .list_users(options.query_args())
                .await
                .context("Failed to list users")?;
            let users: Vec<User> = options.filter.apply(&users).into_iter().cloned().collect();

            let out = UserListOutput {
                total: users.len(),
                users,
                filter: options.filter,
            };
            output(&out, json_mode);
        }

        UsersCommands::Get { id } => {
            let user = api
                .fetch_user(&id)
                .await
                .with_context(|| format!("Failed to fetch user {id}"))?;
            output(&UserDetailOutput { user }, json_mode);
        }

        UsersCommands::Add { name, email, role } => {
            let user = api
                .add_user(NewUser { name, email, role })
                .await
                .context("Failed to add user")?;

            let out = UserActionOutput {
                success: true,
                message: format!("User created: {}", user.id),
                user: Some(user),
            };
            output(&out, json_mode);
        }

        UsersCommands::Update { id, name, email, role, active } => {
            let changes = UserUpdate {
                name,
                email,
                role,
                is_active: active,
            };
            if changes.is_empty() {
                bail!("Nothing to update: pass at least one of --name, --email, --role, --active");
            }

            let user = api
                .update_user(&id, changes)
                .await
                .with_context(|| format!("Failed to update user {id}"))?;

            let out = UserActionOutput {
                success: true,
                message: format!("User updated: {}", user.id),
                user: Some(user),
            };
            output(&out, json_mode);
        }

        UsersCommands::Toggle { id } => {
            let current = api
                .fetch_user(&id)
                .await
                .with_context(|| format!("Failed to fetch user {id}"))?;
            let user = api
                .toggle_user(current)
                .await
                .with_context(|| format!("Failed to toggle user {id}"))?;

            let out = UserActionOutput {
                success: true,
                message: format!(
                    "User {} is now {}",
                    user.id,
                    if user.is_active { "active" } else { "inactive" }
                ),
                user: Some(user),
            };
            output(&out, json_mode);
        }

        UsersCommands::Delete { id } => {
            let response = api
                .delete_user(&id)
                .await
                .with_context(|| format!("Failed to delete user {id}"))?;

            let out = UserActionOutput {
                success: true,
                message: response.message,
                user: None,
            };
            output(&out, json_mode);
        }

        UsersCommands::Watch { list, seconds, refetch_every } => {
            watch(api, &list, Duration::from_secs(seconds), refetch_every, json_mode).await?;
        }
    }

    Ok(())
}

async fn watch(
    api: &UsersApi,
    options: &ListOptions,
    duration: Duration,
    refetch_every: u64,
    json_mode: bool,
) -> Result<()> {
    let mut handle = api
        .get_users(options.query_args())
        .context("Failed to subscribe to the user list")?;

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut refetch = (refetch_every > 0).then(|| tokio::time::interval(Duration::from_secs(refetch_every)));
    if let Some(interval) = refetch.as_mut() {
        // The first tick completes immediately; the subscription already fetched.
        interval.tick().await;
    }

    print_state(&handle.state(), options.filter, json_mode);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            changed = handle.changed() => match changed {
                Some(state) => print_state(&state, options.filter, json_mode),
                None => break,
            },
            _ = async {
                match refetch.as_mut() {
                    Some(interval) => interval.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                // Runs detached; the transitions arrive through `changed`.
                drop(handle.refetch());
            }
        }
    }

    Ok(())
}

fn print_state(state: &crate::application::QueryState<Vec<User>>, filter: UserFilter, json_mode: bool) {
    let out = WatchEventOutput {
        status: state.status,
        is_fetching: state.is_fetching,
        users: state.data.as_ref().map(|users| filter.apply(users).len()),
        error: state.error.clone(),
    };
    output(&out, json_mode);
}
