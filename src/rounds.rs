//! Round controller: dispatch round-1 tasks to a roster, then advance
//! submitted round-1 tasks to round 2.
//!
//! Both passes are safe to re-run: a (identity, round) or
//! (identity, task, round) already acknowledged with HTTP 200 is skipped.
//!
//! Round 2 is generated in the hour bucket of the round-1 dispatch, so its
//! seed and ground truth match the data the submitter already built on.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::{send, TaskRequest, Transport};
use crate::error::GradeError;
use crate::store::{DispatchRecord, NewDispatch, Store};
use crate::task::{generate_at, template_id_of, Task};

/// One submitter: where to send tasks and the secret they expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub email: String,
    pub endpoint: String,
    pub secret: String,
}

/// Load a JSON array of roster entries.
pub fn load_roster(path: &Path) -> anyhow::Result<Vec<RosterEntry>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read roster {}: {}", path.display(), e))?;
    let roster: Vec<RosterEntry> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid roster {}: {}", path.display(), e))?;
    Ok(roster)
}

#[derive(Debug, Clone)]
pub struct RoundSettings {
    /// Where submitters report deployments (`{base}/api/notify`)
    pub evaluation_url: String,
    pub dispatch_timeout: Duration,
}

/// Counts for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    /// Dispatches attempted and recorded
    pub sent: usize,
    /// Of those, acknowledged with HTTP 200
    pub delivered: usize,
    /// Already acknowledged earlier
    pub skipped: usize,
    /// Could not be generated or lacked the round-1 dispatch
    pub failed: usize,
}

/// Send `task`, then record the attempt with whatever status came back.
#[allow(clippy::too_many_arguments)]
async fn dispatch_task(
    store: &dyn Store,
    transport: &dyn Transport,
    settings: &RoundSettings,
    task: &Task,
    email: &str,
    endpoint: &str,
    secret: &str,
    dispatched_at: DateTime<Utc>,
) -> Result<DispatchRecord, GradeError> {
    let nonce = Uuid::new_v4().to_string();
    let request = TaskRequest::new(task, email, secret, &nonce, &settings.evaluation_url);

    let status_code = send(transport, endpoint, &request, settings.dispatch_timeout).await;

    store
        .record_dispatch(NewDispatch {
            identity: email.to_string(),
            task_id: task.task_id.clone(),
            template_id: task.template_id.clone(),
            round: task.round,
            nonce,
            brief: task.brief.clone(),
            checks: task.checks.clone(),
            attachments: task.attachments.clone(),
            endpoint: endpoint.to_string(),
            secret: secret.to_string(),
            evaluation_url: settings.evaluation_url.clone(),
            status_code,
            dispatched_at,
        })
        .await
        .map_err(GradeError::Storage)
}

fn tally(summary: &mut RoundSummary, record: &DispatchRecord) {
    summary.sent += 1;
    if record.delivered() {
        summary.delivered += 1;
        tracing::info!("{} - {}: delivered (round {})", record.identity, record.task_id, record.round);
    } else {
        tracing::warn!(
            "{} - {}: dispatch failed with {:?} (round {})",
            record.identity,
            record.task_id,
            record.status_code,
            record.round
        );
    }
}

/// Dispatch a round-1 task to every roster entry that has not acknowledged one.
pub async fn run_round1(
    store: &dyn Store,
    transport: &dyn Transport,
    roster: &[RosterEntry],
    settings: &RoundSettings,
) -> Result<RoundSummary, GradeError> {
    tracing::info!("Processing {} roster entries for round 1", roster.len());
    let mut summary = RoundSummary::default();

    for entry in roster {
        let previous = store
            .list_dispatches(&entry.email, None, 1)
            .await
            .map_err(GradeError::Storage)?;
        if previous.iter().any(DispatchRecord::delivered) {
            tracing::info!("{}: round 1 already delivered", entry.email);
            summary.skipped += 1;
            continue;
        }

        // One instant for both the seed bucket and the recorded dispatch time.
        let now = Utc::now();
        let task = match generate_at(&entry.email, None, 1, None, now) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!("{}: failed to generate task: {}", entry.email, e);
                summary.failed += 1;
                continue;
            }
        };

        let record = dispatch_task(
            store,
            transport,
            settings,
            &task,
            &entry.email,
            &entry.endpoint,
            &entry.secret,
            now,
        )
        .await?;
        tally(&mut summary, &record);
    }

    tracing::info!(?summary, "Round 1 complete");
    Ok(summary)
}

/// Dispatch round 2 for every (identity, task) with a round-1 submission.
///
/// The endpoint and secret come from the round-1 dispatch the submission
/// answered; the task id is carried over unchanged.
pub async fn run_round2(
    store: &dyn Store,
    transport: &dyn Transport,
    settings: &RoundSettings,
) -> Result<RoundSummary, GradeError> {
    let submissions = store
        .list_submissions(Some(1))
        .await
        .map_err(GradeError::Storage)?;
    tracing::info!("Processing {} round 1 submissions for round 2", submissions.len());

    let mut summary = RoundSummary::default();
    let mut seen = HashSet::new();

    for submission in &submissions {
        if !seen.insert((submission.identity.clone(), submission.task_id.clone())) {
            continue;
        }

        let previous = store
            .list_dispatches(&submission.identity, Some(&submission.task_id), 2)
            .await
            .map_err(GradeError::Storage)?;
        if previous.iter().any(DispatchRecord::delivered) {
            tracing::info!("{} - {}: round 2 already delivered", submission.identity, submission.task_id);
            summary.skipped += 1;
            continue;
        }

        let Some(original) = store
            .find_dispatch(
                &submission.identity,
                &submission.task_id,
                1,
                &submission.nonce,
            )
            .await
            .map_err(GradeError::Storage)?
        else {
            tracing::error!("{} - {}: no round 1 dispatch found", submission.identity, submission.task_id);
            summary.failed += 1;
            continue;
        };

        let template_id = template_id_of(&submission.task_id);
        let task = match generate_at(
            &submission.identity,
            Some(template_id),
            2,
            Some(&submission.task_id),
            original.dispatched_at,
        ) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!("{} - {}: failed to generate round 2: {}", submission.identity, submission.task_id, e);
                summary.failed += 1;
                continue;
            }
        };

        let record = dispatch_task(
            store,
            transport,
            settings,
            &task,
            &submission.identity,
            &original.endpoint,
            &original.secret,
            Utc::now(),
        )
        .await?;
        tally(&mut summary, &record);
    }

    tracing::info!(?summary, "Round 2 complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, NewSubmission};
    use crate::task::time_bucket;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    /// Answers 200 for endpoints containing "ok", 503 otherwise.
    #[derive(Default)]
    struct Recorder {
        posts: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn post_json(&self, url: &str, body: &Value, _timeout: Duration) -> anyhow::Result<u16> {
            self.posts.lock().unwrap().push((url.to_string(), body.clone()));
            Ok(if url.contains("ok") { 200 } else { 503 })
        }
    }

    fn settings() -> RoundSettings {
        RoundSettings {
            evaluation_url: "http://localhost:5001/api/notify".to_string(),
            dispatch_timeout: Duration::from_secs(30),
        }
    }

    fn roster() -> Vec<RosterEntry> {
        vec![
            RosterEntry {
                email: "a@x.org".to_string(),
                endpoint: "http://ok.a/api/deploy".to_string(),
                secret: "sa".to_string(),
            },
            RosterEntry {
                email: "b@x.org".to_string(),
                endpoint: "http://down.b/api/deploy".to_string(),
                secret: "sb".to_string(),
            },
        ]
    }

    async fn submit_round1(store: &InMemoryStore, email: &str) -> DispatchRecord {
        let dispatch = store
            .list_dispatches(email, None, 1)
            .await
            .unwrap()
            .into_iter()
            .find(DispatchRecord::delivered)
            .unwrap();
        store
            .accept_submission(NewSubmission {
                identity: dispatch.identity.clone(),
                task_id: dispatch.task_id.clone(),
                round: 1,
                nonce: dispatch.nonce.clone(),
                repo_url: "https://github.com/a/site".to_string(),
                commit_sha: "abc".to_string(),
                pages_url: "https://a.github.io/site/".to_string(),
            })
            .await
            .unwrap();
        dispatch
    }

    #[tokio::test]
    async fn round1_records_every_attempt() {
        let store = InMemoryStore::new();
        let transport = Recorder::default();

        let summary = run_round1(&store, &transport, &roster(), &settings()).await.unwrap();
        assert_eq!(
            summary,
            RoundSummary {
                sent: 2,
                delivered: 1,
                skipped: 0,
                failed: 0
            }
        );

        let failed = store.list_dispatches("b@x.org", None, 1).await.unwrap();
        assert_eq!(failed[0].status_code, Some(503));

        let posts = transport.posts.lock().unwrap();
        let body = &posts[0].1;
        assert_eq!(body["email"], "a@x.org");
        assert_eq!(body["round"], 1);
        assert_eq!(body["evaluation_url"], "http://localhost:5001/api/notify");
        assert!(Uuid::parse_str(body["nonce"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn round1_rerun_only_retries_failures() {
        let store = InMemoryStore::new();
        let transport = Recorder::default();
        run_round1(&store, &transport, &roster(), &settings()).await.unwrap();

        let again = run_round1(&store, &transport, &roster(), &settings()).await.unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(again.sent, 1);
        assert_eq!(store.list_dispatches("b@x.org", None, 1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn round2_reuses_task_endpoint_and_secret() {
        let store = InMemoryStore::new();
        let transport = Recorder::default();
        run_round1(&store, &transport, &roster(), &settings()).await.unwrap();
        let original = submit_round1(&store, "a@x.org").await;

        let summary = run_round2(&store, &transport, &settings()).await.unwrap();
        assert_eq!(summary.delivered, 1);

        let round2 = store
            .list_dispatches("a@x.org", Some(&original.task_id), 2)
            .await
            .unwrap();
        assert_eq!(round2.len(), 1);
        assert_eq!(round2[0].task_id, original.task_id);
        assert_eq!(round2[0].endpoint, original.endpoint);
        assert_eq!(round2[0].secret, original.secret);
        assert_ne!(round2[0].nonce, original.nonce);

        let again = run_round2(&store, &transport, &settings()).await.unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(again.sent, 0);
    }

    /// Round 1 went out at 09:00 on an earlier day; round 2 runs now.
    #[tokio::test]
    async fn round2_keeps_round1_seed_across_hours() {
        use crate::task::generate_with;
        use chrono::TimeZone;
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let store = InMemoryStore::new();
        let transport = Recorder::default();
        let email = "a@x.org";
        let round1_at = Utc.with_ymd_and_hms(2025, 10, 1, 9, 0, 0).unwrap();
        let round1 = generate_at(email, Some("sum-of-sales"), 1, None, round1_at).unwrap();
        store
            .record_dispatch(NewDispatch {
                identity: email.to_string(),
                task_id: round1.task_id.clone(),
                template_id: round1.template_id.clone(),
                round: 1,
                nonce: "n-1".to_string(),
                brief: round1.brief.clone(),
                checks: round1.checks.clone(),
                attachments: round1.attachments.clone(),
                endpoint: "http://ok.a/api/deploy".to_string(),
                secret: "sa".to_string(),
                evaluation_url: settings().evaluation_url,
                status_code: Some(200),
                dispatched_at: round1_at,
            })
            .await
            .unwrap();
        submit_round1(&store, email).await;

        let summary = run_round2(&store, &transport, &settings()).await.unwrap();
        assert_eq!(summary.delivered, 1);
        let sent = store
            .list_dispatches(email, Some(&round1.task_id), 2)
            .await
            .unwrap()
            .remove(0);
        assert_ne!(time_bucket(sent.dispatched_at), time_bucket(round1_at));

        // Every variant rendered with the round-1 seed; the sent task must be one of them.
        let expected: Vec<Task> = (0..64)
            .map(|i| {
                generate_with(
                    email,
                    Some("sum-of-sales"),
                    2,
                    Some(&round1.task_id),
                    round1_at,
                    &mut StdRng::seed_from_u64(i),
                )
                .unwrap()
            })
            .collect();
        assert!(expected.iter().all(|task| task.seed == round1.seed));
        assert!(expected.iter().any(|task| {
            task.brief == sent.brief
                && task.checks == sent.checks
                && task.attachments == sent.attachments
        }));
    }

    #[tokio::test]
    async fn round2_without_submissions_does_nothing() {
        let store = InMemoryStore::new();
        let transport = Recorder::default();
        run_round1(&store, &transport, &roster(), &settings()).await.unwrap();

        let summary = run_round2(&store, &transport, &settings()).await.unwrap();
        assert_eq!(summary, RoundSummary::default());
    }

    #[test]
    fn roster_parses_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(
            &path,
            r#"[{"email":"a@x.org","endpoint":"http://a/api/deploy","secret":"s"}]"#,
        )
        .unwrap();
        let roster = load_roster(&path).unwrap();
        assert_eq!(roster[0].email, "a@x.org");
        assert!(load_roster(&dir.path().join("missing.json")).is_err());
    }
}
