//! Check pipeline for one submission.
//!
//! Checks run in a fixed order and every check is isolated: an error (or a
//! panic) inside one check becomes a zero score for that check only.
//!
//! | Order | Check | Source |
//! |---|---|---|
//! | 1 | Repo created after task | repository host |
//! | 2 | MIT LICENSE present | `LICENSE` at the commit |
//! | 3 | README quality | `README.md`, qualitative grader |
//! | 4 | Code quality | `index.html`, qualitative grader |
//! | 5 | Rubric check N | `Check::Rubric` items, qualitative grader |
//! | 6 | Functional check N | `Check::Script` items, headless browser |

mod functional;
mod license;
mod quality;
mod runner;
mod timing;

pub use functional::run_functional_checks;
pub use license::license_is_mit;
pub use runner::{CheckRunner, EvaluationOutcome, RunnerSettings};

use thiserror::Error;

use crate::store::NewCheckResult;

pub const TIMING_CHECK: &str = "Repo created after task";
pub const LICENSE_CHECK: &str = "MIT LICENSE present";
pub const README_CHECK: &str = "README quality";
pub const CODE_CHECK: &str = "Code quality";
pub const PAGE_LOAD_CHECK: &str = "Page load";

/// `position` is the 0-based index of the check in the task's check list.
pub fn functional_check_name(position: usize) -> String {
    format!("Functional check {}", position + 1)
}

pub fn rubric_check_name(position: usize) -> String {
    format!("Rubric check {}", position + 1)
}

/// External-service failure inside a check boundary.
#[derive(Debug, Clone, Error)]
pub enum CheckError {
    #[error("invalid repository: {0}")]
    InvalidRepo(String),

    #[error("repository host error: {0}")]
    RepoHost(String),

    #[error("grader error: {0}")]
    Grader(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("check panicked: {0}")]
    Panicked(String),
}

pub(crate) fn outcome(
    name: &str,
    score: f64,
    reason: impl Into<String>,
    raw_log: impl Into<String>,
) -> NewCheckResult {
    NewCheckResult {
        check_name: name.to_string(),
        score,
        reason: reason.into(),
        raw_log: raw_log.into(),
    }
}

pub(crate) fn failed(name: &str, error: &CheckError) -> NewCheckResult {
    outcome(name, 0.0, format!("Error: {}", error), format!("{:?}", error))
}

/// Unweighted mean of check scores (0 when there are none).
pub fn aggregate_score(results: &[NewCheckResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64
}

/// Test doubles for the check capabilities.
#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::Value;

    use crate::browser::{BrowserLauncher, BrowserSession, NETWORK_SNAPSHOT};
    use crate::llm::{Grade, QualitativeGrader};
    use crate::vcs::{RepoHost, RepoRef};

    #[derive(Default)]
    pub struct FakeRepoHost {
        pub files: HashMap<String, String>,
        pub created_at: Option<DateTime<Utc>>,
        pub fail_fetches: bool,
    }

    impl FakeRepoHost {
        pub fn with_file(mut self, path: &str, content: &str) -> Self {
            self.files.insert(path.to_string(), content.to_string());
            self
        }
    }

    #[async_trait]
    impl RepoHost for FakeRepoHost {
        async fn fetch_file(
            &self,
            _repo: &RepoRef,
            _commit: &str,
            path: &str,
        ) -> anyhow::Result<Option<String>> {
            if self.fail_fetches {
                anyhow::bail!("503 Service Unavailable");
            }
            Ok(self.files.get(path).cloned())
        }

        async fn repo_created_at(&self, _repo: &RepoRef) -> anyhow::Result<DateTime<Utc>> {
            self.created_at
                .ok_or_else(|| anyhow::anyhow!("404 Not Found"))
        }
    }

    /// Returns a fixed grade, or fails for prompts containing `fail_on`.
    pub struct FakeGrader {
        pub score: f64,
        pub fail_on: Option<&'static str>,
        pub calls: AtomicUsize,
    }

    impl FakeGrader {
        pub fn scoring(score: f64) -> Self {
            Self {
                score,
                fail_on: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing_on(score: f64, marker: &'static str) -> Self {
            Self {
                score,
                fail_on: Some(marker),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QualitativeGrader for FakeGrader {
        async fn score(&self, prompt: &str) -> anyhow::Result<Grade> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_on {
                if prompt.contains(marker) {
                    anyhow::bail!("Malformed grader response: not json");
                }
            }
            Ok(Grade {
                score: self.score,
                reason: "fake".to_string(),
            })
        }
    }

    /// A page with a title and a fixed set of expression results.
    ///
    /// `pending_resources` finish one per network snapshot; until they all
    /// have, `results` expressions evaluate to null. A `busy` page keeps
    /// loading forever.
    #[derive(Clone, Default)]
    pub struct FakePage {
        pub title: String,
        pub results: HashMap<String, Value>,
        pub load_fails: bool,
        pub pending_resources: usize,
        pub busy: bool,
    }

    pub struct FakeLauncher {
        pub page: FakePage,
        pub opened: Arc<AtomicUsize>,
        pub closed: Arc<AtomicUsize>,
        pub visited: Arc<Mutex<Vec<String>>>,
        pub snapshots: Arc<AtomicUsize>,
    }

    impl FakeLauncher {
        pub fn new(page: FakePage) -> Self {
            Self {
                page,
                opened: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicUsize::new(0)),
                visited: Arc::new(Mutex::new(Vec::new())),
                snapshots: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct FakeSession {
        page: FakePage,
        loaded: usize,
        closed: Arc<AtomicUsize>,
        visited: Arc<Mutex<Vec<String>>>,
        snapshots: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn open(&self) -> anyhow::Result<Box<dyn BrowserSession>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                page: self.page.clone(),
                loaded: 0,
                closed: self.closed.clone(),
                visited: self.visited.clone(),
                snapshots: self.snapshots.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn goto(&mut self, url: &str, _timeout: Duration) -> anyhow::Result<()> {
            self.visited.lock().unwrap().push(url.to_string());
            if self.page.load_fails {
                anyhow::bail!("net::ERR_NAME_NOT_RESOLVED");
            }
            Ok(())
        }

        async fn evaluate(&mut self, expression: &str) -> anyhow::Result<Value> {
            if expression == NETWORK_SNAPSHOT {
                self.snapshots.fetch_add(1, Ordering::SeqCst);
                if self.page.busy || self.loaded < self.page.pending_resources {
                    self.loaded += 1;
                }
                return Ok(serde_json::json!(["complete", self.loaded]));
            }
            if let Some(expected) = expression
                .strip_prefix("document.title === `")
                .and_then(|rest| rest.strip_suffix('`'))
            {
                return Ok(Value::Bool(expected == self.page.title));
            }
            let value = self
                .page
                .results
                .get(expression)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("ReferenceError: {} is not defined", expression))?;
            if self.loaded < self.page.pending_resources {
                return Ok(Value::Null);
            }
            Ok(value)
        }

        async fn close(self: Box<Self>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
