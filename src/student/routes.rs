//! Submitter-side deploy endpoint: build, publish, notify.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::builder::{AppBuilder, BuildRequest, LlmAppBuilder};
use crate::api::auth::verify_secret;
use crate::api::shutdown_signal;
use crate::api::types::HealthResponse;
use crate::config::Config;
use crate::dispatch::{notify_with_retry, HttpTransport, TaskRequest, Transport};
use crate::error::GradeError;
use crate::intake::{require_fields, NotifyRequest};
use crate::llm::ChatCompletionsClient;
use crate::vcs::{mit_license, GitHubClient, PublishedSite, Publisher, SiteFile};

pub const SERVICE_NAME: &str = "student-api";

/// Fields a deploy request must carry. `attachments` is optional.
pub const DEPLOY_FIELDS: [&str; 8] = [
    "email",
    "secret",
    "task",
    "round",
    "nonce",
    "brief",
    "checks",
    "evaluation_url",
];

pub struct StudentState {
    pub config: Config,
    pub builder: Arc<dyn AppBuilder>,
    pub publisher: Arc<dyn Publisher>,
    pub transport: Arc<dyn Transport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
    pub evaluation_notified: bool,
}

pub fn router(state: Arc<StudentState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/deploy", post(deploy))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the deploy-request server with the LLM builder and GitHub publisher.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let timeout = config.grading.request_timeout;
    let llm = ChatCompletionsClient::from_config(&config.llm, timeout)?;
    let builder = LlmAppBuilder::new(Arc::new(llm), config.llm.model.clone());

    let (token, username) = config.require_github()?;
    let publisher = GitHubClient::new(
        Some(token.to_string()),
        Some(username.to_string()),
        timeout,
    )?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.student_port).parse()?;
    let state = Arc::new(StudentState {
        config,
        builder: Arc::new(builder),
        publisher: Arc::new(publisher),
        transport: Arc::new(HttpTransport::new()),
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Deploy endpoint listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy(SERVICE_NAME))
}

/// Files committed for a task: license, readme, app and inline attachments.
fn site_files(request: &TaskRequest, holder: &str, index_html: String, readme: String) -> Vec<SiteFile> {
    let mut files = vec![
        SiteFile::text("LICENSE", mit_license(Utc::now().year(), holder)),
        SiteFile::text("README.md", readme),
        SiteFile::text("index.html", index_html),
    ];
    for attachment in &request.attachments {
        match attachment.decode() {
            Some(content) => files.push(SiteFile {
                path: attachment.name.clone(),
                content,
            }),
            None => tracing::warn!("Skipping attachment {}: not an inline data URI", attachment.name),
        }
    }
    files
}

async fn deploy(
    State(state): State<Arc<StudentState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<DeployResponse>, GradeError> {
    let Json(body) = body.map_err(|e| GradeError::Validation(e.body_text()))?;
    require_fields(&body, &DEPLOY_FIELDS)?;
    let request: TaskRequest =
        serde_json::from_value(body).map_err(|e| GradeError::Validation(e.to_string()))?;
    verify_secret(state.config.student_secret.as_deref(), &request.secret)?;
    if request.round == 0 {
        return Err(GradeError::Validation("round must be at least 1".to_string()));
    }

    tracing::info!(task = %request.task, round = request.round, "Deploy request accepted");

    let build_request = BuildRequest {
        task: &request.task,
        round: request.round,
        brief: &request.brief,
        checks: &request.checks,
        attachment_names: request.attachments.iter().map(|a| a.name.as_str()).collect(),
    };
    let app = state
        .builder
        .build(&build_request)
        .await
        .map_err(|e| GradeError::External(format!("app generation failed: {}", e)))?;

    let holder = state
        .config
        .github_username
        .clone()
        .unwrap_or_else(|| request.email.clone());
    let files = site_files(&request, &holder, app.index_html, app.readme);
    let repo_name = format!("task-{}", request.task);

    let published = if request.round == 1 {
        state
            .publisher
            .publish(&repo_name, &format!("Solution for {}", request.task), &files)
            .await
    } else {
        state.publisher.update(&repo_name, &files).await
    };
    let site: PublishedSite = published
        .map_err(|e| GradeError::External(format!("publishing {} failed: {}", repo_name, e)))?;

    tracing::info!(repo = %site.repo_url, commit = %site.commit_sha, "Published");

    let notification = NotifyRequest {
        email: request.email.clone(),
        task: request.task.clone(),
        round: request.round,
        nonce: request.nonce.clone(),
        repo_url: site.repo_url.clone(),
        commit_sha: site.commit_sha.clone(),
        pages_url: site.pages_url.clone(),
    };
    let report = notify_with_retry(
        state.transport.as_ref(),
        &request.evaluation_url,
        &notification,
        state.config.grading.max_retries,
        state.config.grading.dispatch_timeout,
    )
    .await;

    Ok(Json(DeployResponse {
        repo_url: site.repo_url,
        commit_sha: site.commit_sha,
        pages_url: site.pages_url,
        evaluation_notified: report.delivered,
    }))
}
