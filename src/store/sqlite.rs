//! SQLite-backed store.

use super::payload::{decode_payload, encode_payload};
use super::{
    Acceptance, CheckResult, DispatchRecord, NewCheckResult, NewDispatch, NewSubmission, Store,
    Submission, SubmissionKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS dispatches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity TEXT NOT NULL,
    task_id TEXT NOT NULL,
    template_id TEXT NOT NULL,
    round INTEGER NOT NULL,
    nonce TEXT NOT NULL UNIQUE,
    brief TEXT NOT NULL,
    checks TEXT NOT NULL,
    attachments TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    secret TEXT NOT NULL,
    evaluation_url TEXT NOT NULL,
    status_code INTEGER,
    dispatched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dispatches_key ON dispatches(identity, task_id, round);

CREATE TABLE IF NOT EXISTS submissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity TEXT NOT NULL,
    task_id TEXT NOT NULL,
    round INTEGER NOT NULL,
    nonce TEXT NOT NULL UNIQUE,
    repo_url TEXT NOT NULL,
    commit_sha TEXT NOT NULL,
    pages_url TEXT NOT NULL,
    received_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_submissions_round ON submissions(round);

CREATE TABLE IF NOT EXISTS check_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity TEXT NOT NULL,
    task_id TEXT NOT NULL,
    round INTEGER NOT NULL,
    check_name TEXT NOT NULL,
    score REAL NOT NULL,
    reason TEXT NOT NULL,
    raw_log TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (identity, task_id, round, check_name)
);

CREATE INDEX IF NOT EXISTS idx_results_identity ON check_results(identity);
"#;

const DISPATCH_COLUMNS: &str = "id, identity, task_id, template_id, round, nonce, brief, checks, \
     attachments, endpoint, secret, evaluation_url, status_code, dispatched_at";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create database dir: {}", e))?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| format!("Failed to open SQLite database: {}", e))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| format!("Failed to run schema: {}", e))?;
            Self::run_migrations(&conn)?;
            Ok::<_, String>(conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), String> {
        // Early databases lacked the template column on dispatches.
        let has_template_column: bool = conn
            .prepare("SELECT 1 FROM pragma_table_info('dispatches') WHERE name = 'template_id'")
            .map_err(|e| format!("Failed to check for template_id column: {}", e))?
            .exists([])
            .map_err(|e| format!("Failed to query table info: {}", e))?;

        if !has_template_column {
            tracing::info!("Migrating dispatches: adding template_id column");
            conn.execute(
                "ALTER TABLE dispatches ADD COLUMN template_id TEXT NOT NULL DEFAULT ''",
                [],
            )
            .map_err(|e| format!("Failed to add template_id column: {}", e))?;
        }
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, String> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

fn parse_time(column: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, format!("bad timestamp '{}': {}", raw, e)))
}

fn dispatch_from_row(row: &Row<'_>) -> rusqlite::Result<DispatchRecord> {
    let checks: String = row.get(7)?;
    let attachments: String = row.get(8)?;
    let status_code: Option<i64> = row.get(12)?;
    Ok(DispatchRecord {
        id: row.get(0)?,
        identity: row.get(1)?,
        task_id: row.get(2)?,
        template_id: row.get(3)?,
        round: row.get(4)?,
        nonce: row.get(5)?,
        brief: row.get(6)?,
        checks: decode_payload(&checks).map_err(|e| conversion_error(7, e))?,
        attachments: decode_payload(&attachments).map_err(|e| conversion_error(8, e))?,
        endpoint: row.get(9)?,
        secret: row.get(10)?,
        evaluation_url: row.get(11)?,
        status_code: status_code.and_then(|c| u16::try_from(c).ok()),
        dispatched_at: parse_time(13, row.get(13)?)?,
    })
}

fn submission_from_row(row: &Row<'_>) -> rusqlite::Result<Submission> {
    Ok(Submission {
        id: row.get(0)?,
        identity: row.get(1)?,
        task_id: row.get(2)?,
        round: row.get(3)?,
        nonce: row.get(4)?,
        repo_url: row.get(5)?,
        commit_sha: row.get(6)?,
        pages_url: row.get(7)?,
        received_at: parse_time(8, row.get(8)?)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<CheckResult> {
    Ok(CheckResult {
        id: row.get(0)?,
        identity: row.get(1)?,
        task_id: row.get(2)?,
        round: row.get(3)?,
        check_name: row.get(4)?,
        score: row.get(5)?,
        reason: row.get(6)?,
        raw_log: row.get(7)?,
        created_at: parse_time(8, row.get(8)?)?,
    })
}

const RESULT_COLUMNS: &str =
    "id, identity, task_id, round, check_name, score, reason, raw_log, created_at";

fn has_results_in(conn: &Connection, key: &SubmissionKey) -> rusqlite::Result<bool> {
    conn.prepare_cached(
        "SELECT 1 FROM check_results WHERE identity = ?1 AND task_id = ?2 AND round = ?3 LIMIT 1",
    )?
    .exists(params![key.identity, key.task_id, key.round])
}

#[async_trait]
impl Store for SqliteStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn record_dispatch(&self, dispatch: NewDispatch) -> Result<DispatchRecord, String> {
        let checks = encode_payload(&dispatch.checks)?;
        let attachments = encode_payload(&dispatch.attachments)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO dispatches (identity, task_id, template_id, round, nonce, brief, checks,
                     attachments, endpoint, secret, evaluation_url, status_code, dispatched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    dispatch.identity,
                    dispatch.task_id,
                    dispatch.template_id,
                    dispatch.round,
                    dispatch.nonce,
                    dispatch.brief,
                    checks,
                    attachments,
                    dispatch.endpoint,
                    dispatch.secret,
                    dispatch.evaluation_url,
                    dispatch.status_code,
                    dispatch.dispatched_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to record dispatch: {}", e))?;
            let id = conn.last_insert_rowid();
            Ok(DispatchRecord::from_new(id, dispatch))
        })
        .await
    }

    async fn find_dispatch(
        &self,
        identity: &str,
        task_id: &str,
        round: u32,
        nonce: &str,
    ) -> Result<Option<DispatchRecord>, String> {
        let (identity, task_id, nonce) =
            (identity.to_string(), task_id.to_string(), nonce.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM dispatches
                     WHERE identity = ?1 AND task_id = ?2 AND round = ?3 AND nonce = ?4",
                    DISPATCH_COLUMNS
                ),
                params![identity, task_id, round, nonce],
                dispatch_from_row,
            )
            .optional()
            .map_err(|e| e.to_string())
        })
        .await
    }

    async fn list_dispatches(
        &self,
        identity: &str,
        task_id: Option<&str>,
        round: u32,
    ) -> Result<Vec<DispatchRecord>, String> {
        let identity = identity.to_string();
        let task_id = task_id.map(|t| t.to_string());
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM dispatches
                     WHERE identity = ?1 AND round = ?2 AND (?3 IS NULL OR task_id = ?3)
                     ORDER BY id ASC",
                    DISPATCH_COLUMNS
                ))
                .map_err(|e| e.to_string())?;
            let rows = stmt
                .query_map(params![identity, round, task_id], dispatch_from_row)
                .map_err(|e| e.to_string())?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
        })
        .await
    }

    async fn accept_submission(&self, submission: NewSubmission) -> Result<Acceptance, String> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|e| e.to_string())?;

            let dispatched = tx
                .prepare(
                    "SELECT 1 FROM dispatches
                     WHERE identity = ?1 AND task_id = ?2 AND round = ?3 AND nonce = ?4",
                )
                .and_then(|mut stmt| {
                    stmt.exists(params![
                        submission.identity,
                        submission.task_id,
                        submission.round,
                        submission.nonce
                    ])
                })
                .map_err(|e| e.to_string())?;
            if !dispatched {
                return Ok(Acceptance::UnknownNonce);
            }

            let received_at = Utc::now();
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO submissions
                         (identity, task_id, round, nonce, repo_url, commit_sha, pages_url, received_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        submission.identity,
                        submission.task_id,
                        submission.round,
                        submission.nonce,
                        submission.repo_url,
                        submission.commit_sha,
                        submission.pages_url,
                        received_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| format!("Failed to store submission: {}", e))?;
            if inserted == 0 {
                return Ok(Acceptance::Duplicate);
            }

            let id = tx.last_insert_rowid();
            tx.commit().map_err(|e| e.to_string())?;
            Ok(Acceptance::Accepted(Submission::from_new(
                id,
                submission,
                received_at,
            )))
        })
        .await
    }

    async fn list_submissions(&self, round: Option<u32>) -> Result<Vec<Submission>, String> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, identity, task_id, round, nonce, repo_url, commit_sha, pages_url, received_at
                     FROM submissions
                     WHERE ?1 IS NULL OR round = ?1
                     ORDER BY id ASC",
                )
                .map_err(|e| e.to_string())?;
            let rows = stmt
                .query_map(params![round], submission_from_row)
                .map_err(|e| e.to_string())?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
        })
        .await
    }

    async fn has_results(&self, key: &SubmissionKey) -> Result<bool, String> {
        let key = key.clone();
        self.with_conn(move |conn| has_results_in(conn, &key).map_err(|e| e.to_string()))
            .await
    }

    async fn record_results(
        &self,
        key: &SubmissionKey,
        results: &[NewCheckResult],
    ) -> Result<bool, String> {
        let key = key.clone();
        let results = results.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|e| e.to_string())?;
            if has_results_in(&tx, &key).map_err(|e| e.to_string())? {
                return Ok(false);
            }

            let created_at = Utc::now().to_rfc3339();
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO check_results
                             (identity, task_id, round, check_name, score, reason, raw_log, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )
                    .map_err(|e| e.to_string())?;
                for result in &results {
                    stmt.execute(params![
                        key.identity,
                        key.task_id,
                        key.round,
                        result.check_name,
                        result.score,
                        result.reason,
                        result.raw_log,
                        created_at,
                    ])
                    .map_err(|e| format!("Failed to store result '{}': {}", result.check_name, e))?;
                }
            }
            tx.commit().map_err(|e| e.to_string())?;
            Ok(true)
        })
        .await
    }

    async fn results_for(&self, key: &SubmissionKey) -> Result<Vec<CheckResult>, String> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM check_results
                     WHERE identity = ?1 AND task_id = ?2 AND round = ?3
                     ORDER BY id ASC",
                    RESULT_COLUMNS
                ))
                .map_err(|e| e.to_string())?;
            let rows = stmt
                .query_map(params![key.identity, key.task_id, key.round], result_from_row)
                .map_err(|e| e.to_string())?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
        })
        .await
    }

    async fn results_for_identity(&self, identity: &str) -> Result<Vec<CheckResult>, String> {
        let identity = identity.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM check_results WHERE identity = ?1 ORDER BY id ASC",
                    RESULT_COLUMNS
                ))
                .map_err(|e| e.to_string())?;
            let rows = stmt
                .query_map(params![identity], result_from_row)
                .map_err(|e| e.to_string())?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
        })
        .await
    }
}
