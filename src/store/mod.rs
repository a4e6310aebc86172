//! Append-only storage for dispatches, submissions and check results.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database
//!
//! # Invariants
//! - A dispatch nonce is globally unique.
//! - A submission is stored only against a matching dispatch, at most once per nonce.
//! - Check results for one (identity, task, round) are written in a single batch,
//!   and a second batch for the same key is refused.

mod memory;
mod payload;
mod sqlite;

pub use memory::InMemoryStore;
pub use payload::{decode_payload, encode_payload, PAYLOAD_VERSION};
pub use sqlite::SqliteStore;

use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Attachment, Check};

/// (identity, task, round): the unit that is evaluated once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionKey {
    pub identity: String,
    pub task_id: String,
    pub round: u32,
}

impl std::fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {} (round {})", self.identity, self.task_id, self.round)
    }
}

/// A dispatch attempt, before it is stored.
#[derive(Debug, Clone)]
pub struct NewDispatch {
    pub identity: String,
    pub task_id: String,
    pub template_id: String,
    pub round: u32,
    pub nonce: String,
    pub brief: String,
    pub checks: Vec<Check>,
    pub attachments: Vec<Attachment>,
    pub endpoint: String,
    pub secret: String,
    pub evaluation_url: String,
    /// HTTP status of the dispatch POST (None when the request failed outright)
    pub status_code: Option<u16>,
    pub dispatched_at: DateTime<Utc>,
}

/// A stored dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub id: i64,
    pub identity: String,
    pub task_id: String,
    pub template_id: String,
    pub round: u32,
    pub nonce: String,
    pub brief: String,
    pub checks: Vec<Check>,
    pub attachments: Vec<Attachment>,
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub evaluation_url: String,
    pub status_code: Option<u16>,
    pub dispatched_at: DateTime<Utc>,
}

impl DispatchRecord {
    fn from_new(id: i64, new: NewDispatch) -> Self {
        Self {
            id,
            identity: new.identity,
            task_id: new.task_id,
            template_id: new.template_id,
            round: new.round,
            nonce: new.nonce,
            brief: new.brief,
            checks: new.checks,
            attachments: new.attachments,
            endpoint: new.endpoint,
            secret: new.secret,
            evaluation_url: new.evaluation_url,
            status_code: new.status_code,
            dispatched_at: new.dispatched_at,
        }
    }

    /// Whether the submitter acknowledged this dispatch.
    pub fn delivered(&self) -> bool {
        self.status_code == Some(200)
    }

    pub fn key(&self) -> SubmissionKey {
        SubmissionKey {
            identity: self.identity.clone(),
            task_id: self.task_id.clone(),
            round: self.round,
        }
    }
}

/// An inbound deployment notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub identity: String,
    pub task_id: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

/// An accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub identity: String,
    pub task_id: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
    pub received_at: DateTime<Utc>,
}

impl Submission {
    fn from_new(id: i64, new: NewSubmission, received_at: DateTime<Utc>) -> Self {
        Self {
            id,
            identity: new.identity,
            task_id: new.task_id,
            round: new.round,
            nonce: new.nonce,
            repo_url: new.repo_url,
            commit_sha: new.commit_sha,
            pages_url: new.pages_url,
            received_at,
        }
    }

    pub fn key(&self) -> SubmissionKey {
        SubmissionKey {
            identity: self.identity.clone(),
            task_id: self.task_id.clone(),
            round: self.round,
        }
    }
}

/// Outcome of storing a submission.
#[derive(Debug, Clone)]
pub enum Acceptance {
    Accepted(Submission),
    /// The same (identity, task, round, nonce) was already stored.
    Duplicate,
    /// No dispatch matches (identity, task, round, nonce).
    UnknownNonce,
}

/// One check outcome, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCheckResult {
    pub check_name: String,
    /// In [0, 1]
    pub score: f64,
    pub reason: String,
    pub raw_log: String,
}

/// A stored check outcome. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: i64,
    pub identity: String,
    pub task_id: String,
    pub round: u32,
    pub check_name: String,
    pub score: f64,
    pub reason: String,
    pub raw_log: String,
    pub created_at: DateTime<Utc>,
}

/// Storage trait - implemented by all backends.
#[async_trait]
pub trait Store: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Append a dispatch attempt.
    async fn record_dispatch(&self, dispatch: NewDispatch) -> Result<DispatchRecord, String>;

    /// The dispatch bound to exactly this (identity, task, round, nonce).
    async fn find_dispatch(
        &self,
        identity: &str,
        task_id: &str,
        round: u32,
        nonce: &str,
    ) -> Result<Option<DispatchRecord>, String>;

    /// Dispatch attempts for an identity and round, oldest first.
    /// `task_id = None` matches every task.
    async fn list_dispatches(
        &self,
        identity: &str,
        task_id: Option<&str>,
        round: u32,
    ) -> Result<Vec<DispatchRecord>, String>;

    /// Store a submission iff a matching dispatch exists and its nonce is unclaimed.
    /// The check and the insert are atomic.
    async fn accept_submission(&self, submission: NewSubmission) -> Result<Acceptance, String>;

    /// Submissions in insertion order, optionally restricted to one round.
    async fn list_submissions(&self, round: Option<u32>) -> Result<Vec<Submission>, String>;

    /// Whether any result exists for this key.
    async fn has_results(&self, key: &SubmissionKey) -> Result<bool, String>;

    /// Write a full result batch in one transaction.
    ///
    /// Returns `Ok(false)` without writing when results already exist for `key`.
    async fn record_results(
        &self,
        key: &SubmissionKey,
        results: &[NewCheckResult],
    ) -> Result<bool, String>;

    /// Results for a key, in insertion order.
    async fn results_for(&self, key: &SubmissionKey) -> Result<Vec<CheckResult>, String>;

    /// Every result for an identity, in insertion order.
    async fn results_for_identity(&self, identity: &str) -> Result<Vec<CheckResult>, String>;
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" | "db" => Ok(Self::Sqlite),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

/// Create a store based on backend and database path.
pub async fn create_store(
    backend: StoreBackend,
    database_path: PathBuf,
) -> Result<Box<dyn Store>, String> {
    match backend {
        StoreBackend::Memory => Ok(Box::new(InMemoryStore::new())),
        StoreBackend::Sqlite => {
            let store = SqliteStore::new(database_path).await?;
            Ok(Box::new(store))
        }
    }
}

/// Store contract tests, run against every backend.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;

    pub fn dispatch(identity: &str, task_id: &str, round: u32, nonce: &str) -> NewDispatch {
        NewDispatch {
            identity: identity.to_string(),
            task_id: task_id.to_string(),
            template_id: "sum-of-sales".to_string(),
            round,
            nonce: nonce.to_string(),
            brief: "Publish a page".to_string(),
            checks: vec![Check::Script("document.title === `x`".to_string())],
            attachments: vec![Attachment {
                name: "data.csv".to_string(),
                url: "data:text/csv;base64,eA==".to_string(),
            }],
            endpoint: "http://student.example/api/deploy".to_string(),
            secret: "s3cret".to_string(),
            evaluation_url: "http://localhost:5001/api/notify".to_string(),
            status_code: Some(200),
            dispatched_at: Utc::now(),
        }
    }

    pub fn submission(identity: &str, task_id: &str, round: u32, nonce: &str) -> NewSubmission {
        NewSubmission {
            identity: identity.to_string(),
            task_id: task_id.to_string(),
            round,
            nonce: nonce.to_string(),
            repo_url: "https://github.com/student/task-sum-of-sales-ab12c".to_string(),
            commit_sha: "abc123".to_string(),
            pages_url: "https://student.github.io/task-sum-of-sales-ab12c/".to_string(),
        }
    }

    pub fn result(name: &str, score: f64) -> NewCheckResult {
        NewCheckResult {
            check_name: name.to_string(),
            score,
            reason: "ok".to_string(),
            raw_log: String::new(),
        }
    }

    pub async fn dispatch_roundtrip(store: &dyn Store) {
        let stored = store
            .record_dispatch(dispatch("a@x.org", "sum-of-sales-ab12c", 1, "n-1"))
            .await
            .unwrap();
        assert!(stored.delivered());

        let found = store
            .find_dispatch("a@x.org", "sum-of-sales-ab12c", 1, "n-1")
            .await
            .unwrap()
            .expect("dispatch not found");
        assert_eq!(found.id, stored.id);
        assert_eq!(found.checks, stored.checks);
        assert_eq!(found.attachments, stored.attachments);

        assert!(store
            .find_dispatch("a@x.org", "sum-of-sales-ab12c", 2, "n-1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.list_dispatches("a@x.org", None, 1).await.unwrap().len(),
            1
        );
    }

    pub async fn idempotent_intake(store: &dyn Store) {
        store
            .record_dispatch(dispatch("a@x.org", "sum-of-sales-ab12c", 1, "n-1"))
            .await
            .unwrap();

        let first = store
            .accept_submission(submission("a@x.org", "sum-of-sales-ab12c", 1, "n-1"))
            .await
            .unwrap();
        assert!(matches!(first, Acceptance::Accepted(_)));

        let second = store
            .accept_submission(submission("a@x.org", "sum-of-sales-ab12c", 1, "n-1"))
            .await
            .unwrap();
        assert!(matches!(second, Acceptance::Duplicate));

        assert_eq!(store.list_submissions(None).await.unwrap().len(), 1);
    }

    pub async fn unknown_nonce_rejected(store: &dyn Store) {
        store
            .record_dispatch(dispatch("a@x.org", "sum-of-sales-ab12c", 1, "n-1"))
            .await
            .unwrap();

        for bad in [
            submission("a@x.org", "sum-of-sales-ab12c", 1, "n-404"),
            submission("b@x.org", "sum-of-sales-ab12c", 1, "n-1"),
            submission("a@x.org", "sum-of-sales-ab12c", 2, "n-1"),
        ] {
            let outcome = store.accept_submission(bad).await.unwrap();
            assert!(matches!(outcome, Acceptance::UnknownNonce));
        }
        assert!(store.list_submissions(None).await.unwrap().is_empty());
    }

    pub async fn results_written_once(store: &dyn Store) {
        let key = SubmissionKey {
            identity: "a@x.org".to_string(),
            task_id: "sum-of-sales-ab12c".to_string(),
            round: 1,
        };
        assert!(!store.has_results(&key).await.unwrap());

        let written = store
            .record_results(&key, &[result("MIT LICENSE present", 1.0), result("README quality", 0.7)])
            .await
            .unwrap();
        assert!(written);
        assert!(store.has_results(&key).await.unwrap());

        let again = store
            .record_results(&key, &[result("MIT LICENSE present", 0.0)])
            .await
            .unwrap();
        assert!(!again);

        let stored = store.results_for(&key).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].check_name, "MIT LICENSE present");
        assert_eq!(stored[0].score, 1.0);
        assert_eq!(store.results_for_identity("a@x.org").await.unwrap().len(), 2);
    }

    /// A batch with a repeated check name fails as a whole and leaves nothing behind.
    pub async fn result_batch_is_atomic(store: &dyn Store) {
        let key = SubmissionKey {
            identity: "a@x.org".to_string(),
            task_id: "t-1".to_string(),
            round: 1,
        };
        let batch = [
            result("MIT LICENSE present", 1.0),
            result("Page load", 1.0),
            result("Page load", 0.0),
        ];
        assert!(store.record_results(&key, &batch).await.is_err());
        assert!(!store.has_results(&key).await.unwrap());
        assert!(store.results_for_identity("a@x.org").await.unwrap().is_empty());

        let written = store
            .record_results(&key, &[result("Page load", 0.0)])
            .await
            .unwrap();
        assert!(written);
        assert_eq!(store.results_for(&key).await.unwrap().len(), 1);
    }

    pub async fn submissions_filtered_by_round(store: &dyn Store) {
        store
            .record_dispatch(dispatch("a@x.org", "sum-of-sales-ab12c", 1, "n-1"))
            .await
            .unwrap();
        store
            .record_dispatch(dispatch("a@x.org", "sum-of-sales-ab12c", 2, "n-2"))
            .await
            .unwrap();
        store
            .accept_submission(submission("a@x.org", "sum-of-sales-ab12c", 1, "n-1"))
            .await
            .unwrap();
        store
            .accept_submission(submission("a@x.org", "sum-of-sales-ab12c", 2, "n-2"))
            .await
            .unwrap();

        let round1 = store.list_submissions(Some(1)).await.unwrap();
        assert_eq!(round1.len(), 1);
        assert_eq!(round1[0].nonce, "n-1");
        let all = store.list_submissions(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].id < all[1].id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parsing() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!("SQLite".parse::<StoreBackend>().unwrap(), StoreBackend::Sqlite);
        assert!("postgres".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn key_display() {
        let key = SubmissionKey {
            identity: "a@x.org".to_string(),
            task_id: "sum-of-sales-ab12c".to_string(),
            round: 2,
        };
        assert_eq!(key.to_string(), "a@x.org - sum-of-sales-ab12c (round 2)");
    }
}
