//! Response types for the HTTP servers.

use serde::{Deserialize, Serialize};

use crate::intake::IntakeStatus;
use crate::store::CheckResult;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests
    pub status: String,

    /// Which server answered
    pub service: String,

    /// Crate version
    pub version: String,
}

impl HealthResponse {
    pub fn healthy(service: &str) -> Self {
        Self {
            status: "healthy".to_string(),
            service: service.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Response to `POST /api/notify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub status: IntakeStatus,
}

/// Aggregate for one evaluated (task, round).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskScore {
    pub task_id: String,
    pub round: u32,
    /// Number of recorded checks
    pub checks: usize,
    /// Sum of check scores
    pub total: f64,
    /// Unweighted mean in `[0, 1]`
    pub aggregate: f64,
}

/// Response to `GET /api/results/:email`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub email: String,
    pub scores: Vec<TaskScore>,
    pub results: Vec<CheckResult>,
}

/// Group results by (task, round) in first-seen order.
pub fn summarize(results: &[CheckResult]) -> Vec<TaskScore> {
    let mut scores: Vec<TaskScore> = Vec::new();
    for result in results {
        let existing = scores
            .iter_mut()
            .find(|s| s.task_id == result.task_id && s.round == result.round);
        let entry = match existing {
            Some(entry) => entry,
            None => {
                scores.push(TaskScore {
                    task_id: result.task_id.clone(),
                    round: result.round,
                    checks: 0,
                    total: 0.0,
                    aggregate: 0.0,
                });
                let last = scores.len() - 1;
                &mut scores[last]
            }
        };
        entry.checks += 1;
        entry.total += result.score;
    }
    for score in &mut scores {
        score.aggregate = score.total / score.checks as f64;
    }
    scores
}
