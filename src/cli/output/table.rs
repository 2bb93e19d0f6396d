//! Table output formatting for CLI commands
//!
//! User tables via comfy-table, with colored status cells unless the
//! terminal asks for plain output.

use crate::domain::models::{Role, User};
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self { use_colors, max_width }
    }

    /// Format a list of users as a table
    pub fn format_users(&self, users: &[&User]) -> String {
        let mut table = self.create_base_table();

        table.set_header(vec![
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Email").add_attribute(Attribute::Bold),
            Cell::new("Role").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
            Cell::new("Updated").add_attribute(Attribute::Bold),
        ]);

        for user in users {
            let id = if user.is_placeholder() {
                "(pending)".to_string()
            } else {
                user.id.clone()
            };
            let updated = user
                .updated_at
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());

            table.add_row(vec![
                Cell::new(id),
                Cell::new(truncate_text(&user.name, 30)),
                Cell::new(truncate_text(&user.email, 36)),
                self.role_cell(user.role),
                self.status_cell(user.is_active),
                Cell::new(updated),
            ]);
        }

        table.to_string()
    }

    /// Format a single user as a two-column table
    pub fn format_user(&self, user: &User) -> String {
        let mut table = self.create_base_table();
        let timestamp = |at: Option<chrono::DateTime<chrono::Utc>>| {
            at.map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "-".to_string())
        };

        table.add_row(vec![Cell::new("ID").add_attribute(Attribute::Bold), Cell::new(&user.id)]);
        table.add_row(vec![Cell::new("Name").add_attribute(Attribute::Bold), Cell::new(&user.name)]);
        table.add_row(vec![Cell::new("Email").add_attribute(Attribute::Bold), Cell::new(&user.email)]);
        table.add_row(vec![Cell::new("Role").add_attribute(Attribute::Bold), self.role_cell(user.role)]);
        table.add_row(vec![
            Cell::new("Status").add_attribute(Attribute::Bold),
            self.status_cell(user.is_active),
        ]);
        table.add_row(vec![
            Cell::new("Created").add_attribute(Attribute::Bold),
            Cell::new(timestamp(user.created_at)),
        ]);
        table.add_row(vec![
            Cell::new("Updated").add_attribute(Attribute::Bold),
            Cell::new(timestamp(user.updated_at)),
        ]);

        table.to_string()
    }

    fn status_cell(&self, active: bool) -> Cell {
        let label = if active { "active" } else { "inactive" };
        if self.use_colors {
            Cell::new(label).fg(if active { Color::Green } else { Color::DarkGrey })
        } else {
            Cell::new(format!("{} {label}", if active { "●" } else { "○" }))
        }
    }

    fn role_cell(&self, role: Role) -> Cell {
        match role {
            Role::Admin if self.use_colors => Cell::new(role).fg(Color::Magenta),
            _ => Cell::new(role),
        }
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();

        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(width);
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if color output is supported
fn supports_color() -> bool {
    // Respect NO_COLOR environment variable
    if env::var("NO_COLOR").is_ok() {
        return false;
    }

    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

/// Truncate to `max_len` characters, appending "..." if truncated.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
