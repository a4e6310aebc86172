//! In-memory store (non-persistent).

use super::{
    Acceptance, CheckResult, DispatchRecord, NewCheckResult, NewDispatch, NewSubmission, Store,
    Submission, SubmissionKey,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    dispatches: Vec<DispatchRecord>,
    submissions: Vec<Submission>,
    results: Vec<CheckResult>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Single lock over every table, so accept and record stay atomic.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn record_dispatch(&self, dispatch: NewDispatch) -> Result<DispatchRecord, String> {
        let mut tables = self.tables.write().await;
        if tables.dispatches.iter().any(|d| d.nonce == dispatch.nonce) {
            return Err(format!("Dispatch nonce already used: {}", dispatch.nonce));
        }
        let id = tables.next_id();
        let record = DispatchRecord::from_new(id, dispatch);
        tables.dispatches.push(record.clone());
        Ok(record)
    }

    async fn find_dispatch(
        &self,
        identity: &str,
        task_id: &str,
        round: u32,
        nonce: &str,
    ) -> Result<Option<DispatchRecord>, String> {
        let tables = self.tables.read().await;
        Ok(tables
            .dispatches
            .iter()
            .find(|d| {
                d.identity == identity && d.task_id == task_id && d.round == round && d.nonce == nonce
            })
            .cloned())
    }

    async fn list_dispatches(
        &self,
        identity: &str,
        task_id: Option<&str>,
        round: u32,
    ) -> Result<Vec<DispatchRecord>, String> {
        let tables = self.tables.read().await;
        Ok(tables
            .dispatches
            .iter()
            .filter(|d| d.identity == identity && d.round == round)
            .filter(|d| task_id.map_or(true, |t| d.task_id == t))
            .cloned()
            .collect())
    }

    async fn accept_submission(&self, submission: NewSubmission) -> Result<Acceptance, String> {
        let mut tables = self.tables.write().await;

        let dispatched = tables.dispatches.iter().any(|d| {
            d.identity == submission.identity
                && d.task_id == submission.task_id
                && d.round == submission.round
                && d.nonce == submission.nonce
        });
        if !dispatched {
            return Ok(Acceptance::UnknownNonce);
        }
        if tables.submissions.iter().any(|s| s.nonce == submission.nonce) {
            return Ok(Acceptance::Duplicate);
        }

        let id = tables.next_id();
        let stored = Submission::from_new(id, submission, Utc::now());
        tables.submissions.push(stored.clone());
        Ok(Acceptance::Accepted(stored))
    }

    async fn list_submissions(&self, round: Option<u32>) -> Result<Vec<Submission>, String> {
        let tables = self.tables.read().await;
        Ok(tables
            .submissions
            .iter()
            .filter(|s| round.map_or(true, |r| s.round == r))
            .cloned()
            .collect())
    }

    async fn has_results(&self, key: &SubmissionKey) -> Result<bool, String> {
        let tables = self.tables.read().await;
        Ok(tables.results.iter().any(|r| matches_key(r, key)))
    }

    async fn record_results(
        &self,
        key: &SubmissionKey,
        results: &[NewCheckResult],
    ) -> Result<bool, String> {
        let mut tables = self.tables.write().await;
        if tables.results.iter().any(|r| matches_key(r, key)) {
            return Ok(false);
        }

        // Same (identity, task, round, check_name) uniqueness as the SQLite
        // table, checked before anything is written.
        let mut names = HashSet::with_capacity(results.len());
        if let Some(repeated) = results.iter().find(|r| !names.insert(r.check_name.as_str())) {
            return Err(format!(
                "Failed to store result '{}': duplicate check name for {}",
                repeated.check_name, key
            ));
        }

        let now = Utc::now();
        for result in results {
            let id = tables.next_id();
            tables.results.push(CheckResult {
                id,
                identity: key.identity.clone(),
                task_id: key.task_id.clone(),
                round: key.round,
                check_name: result.check_name.clone(),
                score: result.score,
                reason: result.reason.clone(),
                raw_log: result.raw_log.clone(),
                created_at: now,
            });
        }
        Ok(true)
    }

    async fn results_for(&self, key: &SubmissionKey) -> Result<Vec<CheckResult>, String> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .iter()
            .filter(|r| matches_key(r, key))
            .cloned()
            .collect())
    }

    async fn results_for_identity(&self, identity: &str) -> Result<Vec<CheckResult>, String> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .iter()
            .filter(|r| r.identity == identity)
            .cloned()
            .collect())
    }
}

fn matches_key(result: &CheckResult, key: &SubmissionKey) -> bool {
    result.identity == key.identity && result.task_id == key.task_id && result.round == key.round
}
