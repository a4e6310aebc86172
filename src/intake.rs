//! Submission intake: validate a deployment notification and store it once.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GradeError;
use crate::store::{Acceptance, NewSubmission, Store};

/// Fields a deployment notification must carry.
pub const NOTIFY_FIELDS: [&str; 7] = [
    "email",
    "task",
    "round",
    "nonce",
    "repo_url",
    "commit_sha",
    "pages_url",
];

/// Body of `POST /api/notify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

impl NotifyRequest {
    /// Parse a raw JSON body, naming the first missing field.
    pub fn from_json(body: Value) -> Result<Self, GradeError> {
        require_fields(&body, &NOTIFY_FIELDS)?;
        serde_json::from_value(body).map_err(|e| GradeError::Validation(e.to_string()))
    }

    pub fn into_submission(self) -> NewSubmission {
        NewSubmission {
            identity: self.email,
            task_id: self.task,
            round: self.round,
            nonce: self.nonce,
            repo_url: self.repo_url,
            commit_sha: self.commit_sha,
            pages_url: self.pages_url,
        }
    }
}

/// Fail with `MissingField` for the first field that is absent or null.
pub fn require_fields(body: &Value, fields: &[&str]) -> Result<(), GradeError> {
    if !body.is_object() {
        return Err(GradeError::Validation("body must be a JSON object".to_string()));
    }
    match fields
        .iter()
        .find(|field| body.get(**field).map_or(true, Value::is_null))
    {
        Some(field) => Err(GradeError::MissingField(field.to_string())),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntakeStatus {
    Accepted,
    Duplicate,
}

/// Store a submission iff it matches a dispatch and has not been seen before.
///
/// A repeated notification for the same nonce is acknowledged as `Duplicate`
/// and never overwrites the stored row.
pub async fn accept(store: &dyn Store, submission: NewSubmission) -> Result<IntakeStatus, GradeError> {
    let identity = submission.identity.clone();
    let task_id = submission.task_id.clone();
    let round = submission.round;

    match store
        .accept_submission(submission)
        .await
        .map_err(GradeError::Storage)?
    {
        Acceptance::Accepted(stored) => {
            tracing::info!(
                identity = %identity,
                task_id = %task_id,
                round,
                submission_id = stored.id,
                "Accepted submission"
            );
            Ok(IntakeStatus::Accepted)
        }
        Acceptance::Duplicate => {
            tracing::info!(identity = %identity, task_id = %task_id, round, "Duplicate submission");
            Ok(IntakeStatus::Duplicate)
        }
        Acceptance::UnknownNonce => {
            tracing::warn!(identity = %identity, task_id = %task_id, round, "Rejected submission with unknown nonce");
            Err(GradeError::InvalidNonce)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, NewDispatch};
    use chrono::Utc;
    use serde_json::json;

    fn body() -> Value {
        json!({
            "email": "a@x.org",
            "task": "sum-of-sales-ab12c",
            "round": 1,
            "nonce": "n-1",
            "repo_url": "https://github.com/a/task-sum-of-sales-ab12c",
            "commit_sha": "abc123",
            "pages_url": "https://a.github.io/task-sum-of-sales-ab12c/"
        })
    }

    async fn store_with_dispatch() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .record_dispatch(NewDispatch {
                identity: "a@x.org".to_string(),
                task_id: "sum-of-sales-ab12c".to_string(),
                template_id: "sum-of-sales".to_string(),
                round: 1,
                nonce: "n-1".to_string(),
                brief: String::new(),
                checks: vec![],
                attachments: vec![],
                endpoint: "http://student.example/api/deploy".to_string(),
                secret: "s".to_string(),
                evaluation_url: "http://localhost:5001/api/notify".to_string(),
                status_code: Some(200),
                dispatched_at: Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    #[test]
    fn missing_field_is_named() {
        let mut raw = body();
        raw.as_object_mut().unwrap().remove("commit_sha");
        let err = NotifyRequest::from_json(raw).unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: commit_sha");
    }

    #[test]
    fn null_counts_as_missing() {
        let mut raw = body();
        raw["nonce"] = Value::Null;
        assert!(matches!(
            NotifyRequest::from_json(raw),
            Err(GradeError::MissingField(f)) if f == "nonce"
        ));
    }

    #[test]
    fn non_numeric_round_is_invalid() {
        let mut raw = body();
        raw["round"] = json!("first");
        assert!(matches!(
            NotifyRequest::from_json(raw),
            Err(GradeError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn accepted_then_duplicate() {
        let store = store_with_dispatch().await;
        let request = NotifyRequest::from_json(body()).unwrap();

        let first = accept(&store, request.clone().into_submission()).await.unwrap();
        let second = accept(&store, request.into_submission()).await.unwrap();

        assert_eq!(first, IntakeStatus::Accepted);
        assert_eq!(second, IntakeStatus::Duplicate);
        assert_eq!(store.list_submissions(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_nonce_never_stored() {
        let store = store_with_dispatch().await;
        let mut raw = body();
        raw["nonce"] = json!("forged");
        let request = NotifyRequest::from_json(raw).unwrap();

        let err = accept(&store, request.into_submission()).await.unwrap_err();
        assert!(matches!(err, GradeError::InvalidNonce));
        assert!(store.list_submissions(None).await.unwrap().is_empty());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(IntakeStatus::Duplicate).unwrap(),
            json!("duplicate")
        );
    }
}
