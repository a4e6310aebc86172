//! Task generation: templates, seeded attachments and the rendered `Task`.
//!
//! # Invariants
//! - Same identity + same hour bucket => same seed => same round-1 task.
//! - `task_id` is `{template_id}-{hash}` where the hash covers brief + attachments.
//! - Round-2 tasks carry the round-1 `task_id` verbatim.

mod attachments;
mod generator;
mod templates;

pub use generator::{
    compute_task_id, derive_seed, generate, generate_at, generate_with, render_initial,
    template_id_of, time_bucket,
};
pub use templates::{find_template, Round2Variant, TaskTemplate, TEMPLATES};

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Prefix that marks a check as a browser-executable boolean expression.
pub const SCRIPT_PREFIX: &str = "js:";

/// A single check attached to a task.
///
/// The tag is decided once, when the check string is parsed; evaluation never
/// guesses whether an untagged string is JavaScript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Check {
    /// Boolean expression run against the live page (`js:` prefix stripped).
    Script(String),
    /// Free-form rubric scored by the qualitative grader.
    Rubric(String),
}

impl Check {
    /// Parse a wire-format check string.
    pub fn parse(raw: &str) -> Self {
        match raw.trim_start().strip_prefix(SCRIPT_PREFIX) {
            Some(expr) => Check::Script(expr.trim().to_string()),
            None => Check::Rubric(raw.trim().to_string()),
        }
    }

    /// Wire format sent to submitters.
    pub fn to_wire(&self) -> String {
        match self {
            Check::Script(expr) => format!("{} {}", SCRIPT_PREFIX, expr),
            Check::Rubric(text) => text.clone(),
        }
    }

    pub fn script(&self) -> Option<&str> {
        match self {
            Check::Script(expr) => Some(expr),
            Check::Rubric(_) => None,
        }
    }

    pub fn rubric(&self) -> Option<&str> {
        match self {
            Check::Rubric(text) => Some(text),
            Check::Script(_) => None,
        }
    }
}

/// A file handed to the submitter, usually as a `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

impl Attachment {
    /// Inline bytes of a `data:` URI; `None` for remote URLs or bad encoding.
    pub fn decode(&self) -> Option<Vec<u8>> {
        let rest = self.url.strip_prefix("data:")?;
        let (meta, payload) = rest.split_once(',')?;
        if meta.ends_with(";base64") {
            base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .ok()
        } else {
            Some(payload.as_bytes().to_vec())
        }
    }
}

/// A rendered task, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub template_id: String,
    pub task_id: String,
    pub round: u32,
    pub seed: String,
    pub brief: String,
    pub checks: Vec<Check>,
    pub attachments: Vec<Attachment>,
}

impl Task {
    pub fn wire_checks(&self) -> Vec<String> {
        self.checks.iter().map(Check::to_wire).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_attachment_decodes() {
        let attachment = Attachment {
            name: "data.csv".to_string(),
            url: "data:text/csv;base64,YSxiCjEsMg==".to_string(),
        };
        assert_eq!(attachment.decode().unwrap(), b"a,b\n1,2".to_vec());

        let remote = Attachment {
            name: "x".to_string(),
            url: "https://example.org/x".to_string(),
        };
        assert_eq!(remote.decode(), None);
    }

    #[test]
    fn parse_strips_script_prefix() {
        let check = Check::parse("js: document.title === `x`");
        assert_eq!(check, Check::Script("document.title === `x`".to_string()));
        assert_eq!(check.to_wire(), "js: document.title === `x`");
    }

    #[test]
    fn untagged_string_is_rubric() {
        let check = Check::parse("Page explains how totals are computed");
        assert!(check.script().is_none());
        assert_eq!(check.rubric(), Some("Page explains how totals are computed"));
    }

    #[test]
    fn check_serializes_with_explicit_kind() {
        let json = serde_json::to_value(Check::Script("1 === 1".into())).unwrap();
        assert_eq!(json["kind"], "script");
        assert_eq!(json["body"], "1 === 1");
    }
}
