//! Scan filter construction
//!
//! The filter selects events whose `target_path` starts with the watch
//! directory and whose `time` is strictly greater than the checkpoint.

use std::fmt;

use super::ChangeEvent;

/// osquery table carrying file integrity events
pub const FILE_EVENTS_TABLE: &str = "file_events";

/// Path-prefix plus exclusive-lower-time-bound selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    directory: String,
    after: i64,
}

impl ChangeFilter {
    pub fn new(directory: impl Into<String>, after: i64) -> Self {
        Self {
            directory: directory.into(),
            after,
        }
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Exclusive lower bound, epoch seconds
    pub fn after(&self) -> i64 {
        self.after
    }

    /// Render the filter as an osquery SQL statement
    ///
    /// LIKE wildcards in the directory are escaped so the match is a literal
    /// prefix match.
    pub fn to_sql(&self) -> String {
        format!(
            "SELECT * FROM {} WHERE target_path LIKE '{}%' ESCAPE '\\' AND time > {};",
            FILE_EVENTS_TABLE,
            escape_like_literal(&self.directory),
            self.after
        )
    }

    /// Apply the same predicate in-process
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        let (Some(path), Some(time)) = (event.target_path(), event.parsed_time()) else {
            return false;
        };
        path.starts_with(&self.directory) && time > self.after
    }
}

impl fmt::Display for ChangeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}* after {}", self.directory, self.after)
    }
}

fn escape_like_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\'' => escaped.push_str("''"),
            '\\' | '%' | '_' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
