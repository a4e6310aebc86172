//! Repository must be created after the task was dispatched.

use chrono::{DateTime, Utc};

use super::{outcome, CheckError, TIMING_CHECK};
use crate::store::NewCheckResult;
use crate::vcs::{RepoHost, RepoRef};

/// `dispatched_at` is the dispatch of the submission's own round, so a later
/// round that updates the round-1 repo scores 0 here.
pub(crate) async fn check_timing(
    host: &dyn RepoHost,
    repo: &RepoRef,
    dispatched_at: DateTime<Utc>,
) -> Result<NewCheckResult, CheckError> {
    let created_at = host
        .repo_created_at(repo)
        .await
        .map_err(|e| CheckError::RepoHost(e.to_string()))?;

    let score = if created_at > dispatched_at { 1.0 } else { 0.0 };
    Ok(outcome(
        TIMING_CHECK,
        score,
        format!(
            "Repo created at {}, task sent at {}",
            created_at.to_rfc3339(),
            dispatched_at.to_rfc3339()
        ),
        format!("created={} dispatched={}", created_at, dispatched_at),
    ))
}
