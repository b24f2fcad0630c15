use std::sync::Arc;

use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{Path, Query, State, rejection::FormRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::badge;
use crate::builder::{BuildExecutor, BuildPool};
use crate::config::Config;
use crate::errors::{RegistryError, WebhookError};
use crate::hub::MessageHub;
use crate::proxy::NginxConfigurator;
use crate::registry::{Actor, BuildStatus, Registry, RegistryHandle};
use crate::webhook::{Dispatched, WebhookDispatcher, signature};

pub const HEADER_API_SIGN: &str = "x-rtfd-sign";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub config: Arc<Config>,
    pub registry: RegistryHandle,
    pub hub: Arc<MessageHub>,
    pub pool: Arc<BuildPool>,
    pub dispatcher: WebhookDispatcher,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the registry, hub, build pool and dispatcher for `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: Config) -> Self {
        let artifacts = Arc::new(NginxConfigurator::new(&config));
        let registry = RegistryHandle::new(Registry::new(&config, artifacts));
        let hub = Arc::new(MessageHub::new());
        let executor = Arc::new(BuildExecutor::new(&config, registry.clone(), hub.clone()));
        let pool = Arc::new(BuildPool::new(executor, config.build.max_concurrent));
        let dispatcher = WebhookDispatcher::new(
            registry.clone(),
            pool.clone(),
            config.default.default_branch.clone(),
        );
        Self {
            config: Arc::new(config),
            registry,
            hub,
            pool,
            dispatcher,
        }
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct BranchParams {
    pub branch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageParams {
    pub raw: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

/// Failures reported as `{code, msg}`. Only `BadRequest` and `Internal`
/// change the HTTP status.
#[derive(Debug)]
pub enum ApiError {
    Code(i32, String),
    BadRequest(i32, String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match self {
            ApiError::Code(code, msg) => (StatusCode::OK, code, msg),
            ApiError::BadRequest(code, msg) => (StatusCode::BAD_REQUEST, code, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, 500, msg),
        };
        (status, Json(json!({"code": code, "msg": msg}))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound { .. } => ApiError::Code(404, e.to_string()),
            other => {
                error!(error = %other, "Registry failure");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

/// Webhook failures keep HTTP 200 so providers do not retry; only an
/// unrecognised sender gets a 400.
impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::UnsupportedProvider => ApiError::BadRequest(e.code(), e.to_string()),
            WebhookError::Registry(ref inner) => {
                error!(error = %inner, "Registry failure during webhook dispatch");
                ApiError::Code(e.code(), e.to_string())
            }
            other => ApiError::Code(other.code(), other.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhook/{name}", post(webhook))
        .route("/rtfd/{name}/webhook", post(webhook))
        .route("/rtfd/{name}/build", post(trigger_build))
        .route("/rtfd/{name}/message", get(next_message))
        .route("/rtfd/{name}/desc", get(describe))
        .route("/rtfd/{name}/badge", get(badge_svg))
}

fn is_true(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "on")
    )
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn webhook(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let body = match state.dispatcher.dispatch(&name, &headers, &body).await? {
        Dispatched::Pong => json!({"code": 0, "msg": "pong"}),
        Dispatched::Ignored { reason } => json!({"code": 0, "msg": reason}),
        Dispatched::Triggered { branch, .. } => json!({"code": 0, "msg": "ok", "branch": branch}),
    };
    Ok(Json(body))
}

async fn trigger_build(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Query(query): Query<BranchParams>,
    form: Result<Form<BranchParams>, FormRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = name.trim().to_lowercase();
    let record = {
        let key = key.clone();
        state.registry.call(move |r| r.get(&key)).await?
    }
    .ok_or_else(|| ApiError::Code(404, "Not Found".to_string()))?;

    if let Some(secret) = record.secret.as_deref() {
        let sign = headers.get(HEADER_API_SIGN).and_then(|v| v.to_str().ok());
        if !signature::verify_api_sign(secret, sign) {
            return Err(ApiError::Code(403, "Invalid sign".to_string()));
        }
    }

    let requested = form
        .ok()
        .and_then(|Form(p)| p.branch)
        .or(query.branch)
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| "latest".to_string());
    let branch = record.resolve_branch(requested.trim()).to_string();
    let build_id = state.pool.submit(&key, &branch, Actor::Api);
    info!(project = %key, branch = %branch, build_id = %build_id, "Build requested via API");

    Ok(Json(json!({"code": 0, "branch": branch, "msg": "ok"})))
}

async fn next_message(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(params): Query<MessageParams>,
) -> Response {
    let line = state.hub.dequeue(&name.trim().to_lowercase());
    if is_true(params.raw.as_deref()) {
        return (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            line.unwrap_or_default(),
        )
            .into_response();
    }
    Json(json!({"code": 0, "msg": line})).into_response()
}

async fn describe(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let view = state.registry.call(move |r| r.get_for_api(&name)).await?;
    Ok(Json(json!({"code": 0, "data": view})))
}

async fn badge_svg(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(params): Query<BranchParams>,
) -> Response {
    let branch = params
        .branch
        .map(|b| b.trim().to_lowercase())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| "latest".to_string());
    let status = match state
        .registry
        .call(move |r| r.get_for_badge(&name, &branch))
        .await
    {
        Ok(status) => status,
        Err(e) => {
            error!(error = %e, "Failed to read badge status");
            BuildStatus::Unknown
        }
    };
    (
        [
            (header::CONTENT_TYPE, badge::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        badge::svg_for(status),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProjectFields;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(script: &str) -> (TempDir, SharedState) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("build.sh");
        std::fs::write(&path, script).unwrap();
        let mut config = Config::new(dir.path());
        config.build.command = vec!["sh".into(), path.to_string_lossy().to_string()];
        let state = Arc::new(AppState::from_config(config));
        state
            .registry
            .blocking()
            .create(
                "docs-a",
                "https://github.com/acme/docs-a",
                ProjectFields {
                    latest: Some("main".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        (dir, state)
    }

    async fn send(state: &SharedState, req: Request<Body>) -> Response {
        api_router()
            .with_state(state.clone())
            .oneshot(req)
            .await
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_build(state: &SharedState, branch: &str) {
        for _ in 0..100 {
            let record = state.registry.blocking().get("docs-a").unwrap().unwrap();
            if record.builds.get(branch).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("No build result recorded for {branch}");
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, state) = test_state("true\n");
        let resp = send(&state, get("/health")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "ok");
    }

    #[tokio::test]
    async fn test_github_push_webhook_triggers_build() {
        let (_dir, state) = test_state("echo 'Build Successfully 2'\n");
        let req = Request::builder()
            .method("POST")
            .uri("/rtfd/docs-a/webhook")
            .header("user-agent", "GitHub-Hookshot/0a1b2c")
            .header("x-github-event", "push")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"ref":"refs/heads/main"}"#))
            .unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body, json!({"code": 0, "branch": "main", "msg": "ok"}));

        wait_for_build(&state, "main").await;
        let record = state.registry.blocking().get("docs-a").unwrap().unwrap();
        let result = record.builds.get("main").unwrap();
        assert_eq!(result.status, BuildStatus::Passing);
        assert_eq!(result.sender, Actor::Webhook);
        assert_eq!(result.usedtime, 2);
    }

    #[tokio::test]
    async fn test_webhook_unsupported_provider_is_400() {
        let (_dir, state) = test_state("true\n");
        let req = Request::builder()
            .method("POST")
            .uri("/webhook/docs-a")
            .header("user-agent", "curl/8.0")
            .body(Body::from("{}"))
            .unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["code"], 10);
    }

    #[tokio::test]
    async fn test_webhook_ping_and_unknown_project() {
        let (_dir, state) = test_state("true\n");
        let ping = Request::builder()
            .method("POST")
            .uri("/webhook/ghost")
            .header("user-agent", "GitHub-Hookshot/1")
            .header("x-github-event", "ping")
            .body(Body::from("{}"))
            .unwrap();
        let body = body_json(send(&state, ping).await).await;
        assert_eq!(body["msg"], "pong");

        let push = Request::builder()
            .method("POST")
            .uri("/webhook/ghost")
            .header("user-agent", "GitHub-Hookshot/1")
            .header("x-github-event", "push")
            .body(Body::from(r#"{"ref":"refs/heads/main"}"#))
            .unwrap();
        let resp = send(&state, push).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["code"], 404);
    }

    #[tokio::test]
    async fn test_webhook_registry_failure_keeps_http_200() {
        let (dir, state) = test_state("true\n");
        std::fs::write(
            dir.path().join(".docforge-projects.json"),
            r#"{"docs-a": {"latest": "main"}}"#,
        )
        .unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/webhook/docs-a")
            .header("user-agent", "GitHub-Hookshot/1")
            .header("x-github-event", "push")
            .body(Body::from(r#"{"ref":"refs/heads/main"}"#))
            .unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["code"], 500);
        assert_eq!(state.pool.active(), 0);
    }

    #[tokio::test]
    async fn test_badge_unknown_then_passing() {
        let (_dir, state) = test_state("echo building\necho 'Build Successfully'\n");
        let resp = send(&state, get("/rtfd/docs-a/badge")).await;
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            badge::CONTENT_TYPE
        );
        assert!(body_text(resp).await.contains(">unknown</text>"));

        let req = Request::builder()
            .method("POST")
            .uri("/rtfd/docs-a/build")
            .body(Body::empty())
            .unwrap();
        let body = body_json(send(&state, req).await).await;
        assert_eq!(body, json!({"code": 0, "branch": "main", "msg": "ok"}));

        wait_for_build(&state, "main").await;
        let resp = send(&state, get("/rtfd/docs-a/badge?branch=latest")).await;
        assert!(body_text(resp).await.contains(">passing</text>"));
        let resp = send(&state, get("/rtfd/docs-a/badge?branch=dev")).await;
        assert!(body_text(resp).await.contains(">unknown</text>"));
    }

    #[tokio::test]
    async fn test_build_branch_from_form_and_query() {
        let (_dir, state) = test_state("echo 'Build Successfully'\n");
        let req = Request::builder()
            .method("POST")
            .uri("/rtfd/docs-a/build?branch=dev")
            .body(Body::empty())
            .unwrap();
        assert_eq!(body_json(send(&state, req).await).await["branch"], "dev");

        let req = Request::builder()
            .method("POST")
            .uri("/rtfd/docs-a/build?branch=dev")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("branch=v1.0"))
            .unwrap();
        assert_eq!(body_json(send(&state, req).await).await["branch"], "v1.0");
        wait_for_build(&state, "v1.0").await;
        wait_for_build(&state, "dev").await;
    }

    #[tokio::test]
    async fn test_build_requires_sign_when_secret_set() {
        let (_dir, state) = test_state("echo 'Build Successfully'\n");
        state
            .registry
            .blocking()
            .update(
                "docs-a",
                ProjectFields {
                    secret: Some("s3cret".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/rtfd/docs-a/build")
            .body(Body::empty())
            .unwrap();
        assert_eq!(body_json(send(&state, req).await).await["code"], 403);

        let req = Request::builder()
            .method("POST")
            .uri("/rtfd/docs-a/build")
            .header(HEADER_API_SIGN, signature::api_sign("s3cret"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(body_json(send(&state, req).await).await["code"], 0);
        wait_for_build(&state, "main").await;
    }

    #[tokio::test]
    async fn test_build_unknown_project() {
        let (_dir, state) = test_state("true\n");
        let req = Request::builder()
            .method("POST")
            .uri("/rtfd/ghost/build")
            .body(Body::empty())
            .unwrap();
        let body = body_json(send(&state, req).await).await;
        assert_eq!(body, json!({"code": 404, "msg": "Not Found"}));
    }

    #[tokio::test]
    async fn test_message_queue_json_and_raw() {
        let (_dir, state) = test_state("true\n");
        state.hub.enqueue("docs-a", "first");
        state.hub.enqueue("docs-a", "second");

        let body = body_json(send(&state, get("/rtfd/docs-a/message")).await).await;
        assert_eq!(body, json!({"code": 0, "msg": "first"}));

        let resp = send(&state, get("/rtfd/docs-a/message?raw=true")).await;
        assert!(
            resp.headers()
                .get(header::CONTENT_TYPE)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        assert_eq!(body_text(resp).await, "second");

        let body = body_json(send(&state, get("/rtfd/docs-a/message")).await).await;
        assert_eq!(body, json!({"code": 0, "msg": null}));
        let resp = send(&state, get("/rtfd/docs-a/message?raw=1")).await;
        assert_eq!(body_text(resp).await, "");
    }

    #[tokio::test]
    async fn test_describe() {
        let (dir, state) = test_state("true\n");
        std::fs::create_dir_all(dir.path().join("docs/docs-a/en/v1.0")).unwrap();
        std::fs::create_dir_all(dir.path().join("docs/docs-a/en/latest")).unwrap();

        let body = body_json(send(&state, get("/rtfd/docs-a/desc")).await).await;
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["latest"], "main");
        assert_eq!(body["data"]["dn"], "docs-a.localhost");
        assert_eq!(body["data"]["custom_dn"], false);
        assert_eq!(body["data"]["versions"]["en"], json!(["v1.0"]));
        assert_eq!(body["data"]["gsp"], "GitHub");

        let body = body_json(send(&state, get("/rtfd/ghost/desc")).await).await;
        assert_eq!(body["code"], 404);
    }
}
