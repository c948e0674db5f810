//! User search view.

use crate::api::{Backend, SEARCH_PATH};
use crate::session::UserRecord;
use serde_json::Value;
use std::fmt::Write as _;

pub const NO_USERS_FOUND: &str = "No users found with that username.";
pub const UNKNOWN_ERROR: &str = "An unknown error occurred.";
pub const CONNECTION_ERROR: &str = "Failed to connect to the server. Please try again.";

fn placeholder_results() -> Vec<UserRecord> {
    vec![
        UserRecord::new("1", "john_doe", "john@example.com"),
        UserRecord::new("2", "jane_doe", "jane@example.com"),
    ]
}

/// What a submission ended up doing, for the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Blank query, nothing sent
    Skipped,
    Found(usize),
    NoMatches,
    Rejected(u16),
    Unreachable,
}

#[derive(Debug, Clone, Default)]
pub struct SearchView {
    seed_placeholders: bool,
    results: Vec<UserRecord>,
    error_message: Option<String>,
}

impl SearchView {
    pub fn new(seed_placeholders: bool) -> Self {
        Self {
            seed_placeholders,
            ..Default::default()
        }
    }

    pub fn results(&self) -> &[UserRecord] {
        &self.results
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn submit(&mut self, query: &str, backend: &dyn Backend) -> SearchOutcome {
        self.error_message = None;
        self.results = if self.seed_placeholders {
            placeholder_results()
        } else {
            Vec::new()
        };

        if query.trim().is_empty() {
            return SearchOutcome::Skipped;
        }

        let resp = match backend.get(SEARCH_PATH, &[("username", query)]) {
            Ok(resp) => resp,
            Err(e) => {
                eprintln!("Network or server error: {}", e);
                self.error_message = Some(CONNECTION_ERROR.to_string());
                return SearchOutcome::Unreachable;
            }
        };

        // A body that is not JSON (e.g. a proxy error page) is a connectivity failure
        if !resp.json {
            eprintln!(
                "Network or server error: HTTP {} response body is not JSON",
                resp.status
            );
            self.error_message = Some(CONNECTION_ERROR.to_string());
            return SearchOutcome::Unreachable;
        }

        if !resp.is_success() {
            self.error_message = Some(resp.message().unwrap_or(UNKNOWN_ERROR).to_string());
            return SearchOutcome::Rejected(resp.status);
        }

        let Some(rows) = resp.body.get("data").and_then(Value::as_array) else {
            eprintln!("Network or server error: search response has no data array");
            self.error_message = Some(CONNECTION_ERROR.to_string());
            return SearchOutcome::Unreachable;
        };

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<UserRecord>(row.clone()) {
                Ok(user) => results.push(user),
                Err(e) => eprintln!("Skipping malformed search result {}: {}", row, e),
            }
        }

        if results.is_empty() {
            self.results.clear();
            self.error_message = Some(NO_USERS_FOUND.to_string());
            return SearchOutcome::NoMatches;
        }

        self.results = results;
        SearchOutcome::Found(self.results.len())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(message) = &self.error_message {
            let _ = writeln!(out, "! {}", message);
        }
        if !self.results.is_empty() {
            let _ = writeln!(out, "Results:");
            for user in &self.results {
                let _ = writeln!(out, "  {}  {}", user.username, user.email);
            }
        }
        out
    }
}
