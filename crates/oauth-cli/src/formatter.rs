//! Output formatting: a JSON mode for scripting and a colored table/text
//! mode for interactive use.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use owo_colors::OwoColorize;
use oauth_core::types::ServerConfig;

/// Formats CLI results either as pretty JSON or as human-readable text.
pub struct Formatter {
    json: bool,
}

impl Formatter {
    /// Build a formatter; `json` selects machine-readable output.
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Display any serializable value.
    pub fn display<T: serde::Serialize>(&self, value: &T) {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".into()));
        } else {
            println!("{}", serde_json::to_value(value).unwrap_or_default());
        }
    }

    /// Print a short success message (human mode) or `{"status":"ok",...}`
    /// (JSON mode).
    pub fn success(&self, message: &str) {
        if self.json {
            println!("{}", serde_json::json!({ "status": "ok", "message": message }));
        } else {
            println!("{} {message}", "ok".green().bold());
        }
    }

    /// Print registered servers as a table (human mode) or a JSON array.
    pub fn display_servers(&self, servers: &[ServerConfig]) {
        if self.json {
            self.display(&servers);
            return;
        }
        if servers.is_empty() {
            println!("{}", "no servers registered".yellow());
            return;
        }
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec!["Server", "Provider", "Client ID", "Active", "Updated"]);
        for server in servers {
            table.add_row(vec![
                server.server_name.clone(),
                server.provider_type.to_string(),
                server.client_id.clone(),
                server.is_active.to_string(),
                server.updated_at.to_rfc3339(),
            ]);
        }
        println!("{table}");
    }

    /// Print an error with its category, colored in human mode.
    pub fn error(&self, err: &crate::error::CliError) {
        if self.json {
            eprintln!("{}", serde_json::json!({ "status": "error", "message": err.to_string() }));
        } else {
            eprintln!("{} {err}", "error:".red().bold());
        }
    }
}
