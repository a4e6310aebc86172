//! Evaluator HTTP routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::types::{summarize, HealthResponse, NotifyResponse, ResultsResponse};
use crate::config::Config;
use crate::error::GradeError;
use crate::intake::{self, NotifyRequest};
use crate::store::{create_store, Store};

pub const SERVICE_NAME: &str = "taskgrade";

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
}

/// Build the evaluator router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/notify", post(notify))
        .route("/api/results/:email", get(results))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the evaluator server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = create_store(config.store_backend, config.database_path.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;
    tracing::info!(
        backend = ?config.store_backend,
        persistent = store.is_persistent(),
        "Submission store ready"
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = Arc::new(AppState {
        config,
        store: Arc::from(store),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Evaluator listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy(SERVICE_NAME))
}

/// Accept a deployment notification.
async fn notify(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<NotifyResponse>, GradeError> {
    let Json(body) = body.map_err(|e| GradeError::Validation(e.body_text()))?;
    let request = NotifyRequest::from_json(body)?;
    let status = intake::accept(state.store.as_ref(), request.into_submission()).await?;
    Ok(Json(NotifyResponse { status }))
}

async fn results(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<ResultsResponse>, GradeError> {
    let results = state
        .store
        .results_for_identity(&email)
        .await
        .map_err(GradeError::Storage)?;
    Ok(Json(ResultsResponse {
        scores: summarize(&results),
        email,
        results,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{contract, InMemoryStore, Store};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use std::path::PathBuf;
    use tower::util::ServiceExt;

    async fn app() -> (Router, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .record_dispatch(contract::dispatch("a@x.org", "t-1", 1, "n-1"))
            .await
            .unwrap();
        let state = Arc::new(AppState {
            config: Config::new(PathBuf::from("unused.db")),
            store: store.clone(),
        });
        (router(state), store)
    }

    fn notify_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/notify")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn notify_body() -> Value {
        json!({
            "email": "a@x.org",
            "task": "t-1",
            "round": 1,
            "nonce": "n-1",
            "repo_url": "https://github.com/a/site",
            "commit_sha": "abc",
            "pages_url": "https://a.github.io/site/"
        })
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn notify_accepts_then_reports_duplicate() {
        let (app, store) = app().await;

        let first = app.clone().oneshot(notify_request(notify_body())).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(json_body(first).await["status"], "accepted");

        let second = app.oneshot(notify_request(notify_body())).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(json_body(second).await["status"], "duplicate");

        assert_eq!(store.list_submissions(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn notify_missing_field_is_400() {
        let (app, _) = app().await;
        let mut body = notify_body();
        body.as_object_mut().unwrap().remove("pages_url");

        let response = app.oneshot(notify_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "Missing required field: pages_url"
        );
    }

    #[tokio::test]
    async fn notify_unknown_nonce_is_400() {
        let (app, store) = app().await;
        let mut body = notify_body();
        body["nonce"] = json!("forged");

        let response = app.oneshot(notify_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.list_submissions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let (app, _) = app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/notify")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_service() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn results_include_aggregates() {
        let (app, store) = app().await;
        store
            .accept_submission(contract::submission("a@x.org", "t-1", 1, "n-1"))
            .await
            .unwrap();
        let key = crate::store::SubmissionKey {
            identity: "a@x.org".to_string(),
            task_id: "t-1".to_string(),
            round: 1,
        };
        store
            .record_results(
                &key,
                &[contract::result("A", 1.0), contract::result("B", 0.0)],
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/results/a@x.org")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
        assert_eq!(body["scores"][0]["task_id"], "t-1");
        assert_eq!(body["scores"][0]["aggregate"], 0.5);
    }
}
