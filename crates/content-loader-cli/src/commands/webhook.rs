//! GitHub webhook receiver: reloads content whenever a matching push arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use content_loader::{Loader, SourceContent, SourceError};
use content_loader_github::GitHubSourceContent;
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::Mutex;

use super::load::load_from;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";
const DELIVERY_HEADER: &str = "x-github-delivery";

type HmacSha256 = Hmac<Sha256>;

/// Builds the source content for a push, given the clone URL and commit id.
pub type SourceBuilder =
    Arc<dyn Fn(&str, &str) -> Result<Box<dyn SourceContent>, SourceError> + Send + Sync>;

/// Source builder that snapshots pushed commits from GitHub.
pub fn github_sources(token: Option<String>) -> SourceBuilder {
    Arc::new(move |clone_url: &str, commit: &str| {
        let source = GitHubSourceContent::new(clone_url)?
            .with_ref(commit)
            .with_client(token.clone(), None);
        Ok(Box::new(source) as Box<dyn SourceContent>)
    })
}

/// State shared with the webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    loader: Arc<Loader>,
    sources: SourceBuilder,
    secret: Arc<Vec<u8>>,
    matching_refs: Arc<Vec<Regex>>,
    /// Held for the whole of a load so overlapping pushes run one at a time.
    run_lock: Arc<Mutex<()>>,
}

impl WebhookState {
    /// Fails when any ref expression is not a valid regex.
    pub fn new(
        loader: Loader,
        sources: SourceBuilder,
        secret: &str,
        matching_refs: &[String],
    ) -> Result<Self> {
        let matching_refs = matching_refs
            .iter()
            .map(|expr| {
                Regex::new(expr).with_context(|| format!("invalid matching ref expression: {expr}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            loader: Arc::new(loader),
            sources,
            secret: Arc::new(secret.as_bytes().to_vec()),
            matching_refs: Arc::new(matching_refs),
            run_lock: Arc::new(Mutex::new(())),
        })
    }

    fn is_applicable_ref(&self, git_ref: &str) -> bool {
        self.matching_refs.is_empty() || self.matching_refs.iter().any(|re| re.is_match(git_ref))
    }
}

/// The parts of a push event payload we act on.
#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    pusher: Option<Pusher>,
    repository: Repository,
    #[serde(default)]
    head_commit: Option<HeadCommit>,
}

#[derive(Debug, Deserialize)]
struct Pusher {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct HeadCommit {
    id: String,
}

/// Build the axum router for the health and webhook endpoints.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook", post(handle_webhook))
        .with_state(state)
}

/// Bind `0.0.0.0:port` and serve until the process is stopped.
pub async fn serve(state: WebhookState, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    tracing::info!(port, "webhook server running");
    axum::serve(listener, router(state))
        .await
        .context("webhook server failed")
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn handle_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let delivery = header(DELIVERY_HEADER).unwrap_or_default().to_owned();

    if let Err(reason) = verify_signature(&state.secret, header(SIGNATURE_HEADER), &body) {
        tracing::warn!(%delivery, reason, "failed to validate webhook payload");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let event = header(EVENT_HEADER).unwrap_or_default();
    if event != "push" {
        tracing::debug!(%delivery, event, "ignoring unsupported webhook event type");
        return StatusCode::OK.into_response();
    }

    let push: PushEvent = match serde_json::from_slice(&body) {
        Ok(push) => push,
        Err(e) => {
            tracing::warn!(%delivery, error = %e, "unable to parse push event");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match handle_push(&state, &delivery, push).await {
        Ok(Some(stats)) => Json(stats).into_response(),
        Ok(None) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::warn!(%delivery, error = %format!("{e:#}"), "failed to handle push event");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response()
        }
    }
}

/// Load the pushed commit. `None` when the ref isn't one we follow.
async fn handle_push(
    state: &WebhookState,
    delivery: &str,
    push: PushEvent,
) -> Result<Option<content_loader::LoadStatistics>> {
    if !state.is_applicable_ref(&push.git_ref) {
        tracing::debug!(git_ref = %push.git_ref, delivery, "ignoring push to non-matching ref");
        return Ok(None);
    }

    let commit = push.head_commit.map(|c| c.id).unwrap_or_default();
    let clone_url = push.repository.clone_url;
    let mut source = (state.sources)(&clone_url, &commit)
        .with_context(|| format!("failed to prepare source content from {clone_url}"))?;

    let _running = state.run_lock.lock().await;
    tracing::info!(
        pusher = push.pusher.as_ref().map(|p| p.name.as_str()).unwrap_or_default(),
        git_ref = %push.git_ref,
        %clone_url,
        %commit,
        delivery,
        "loading source content for push event"
    );

    let report = load_from(&state.loader, source.as_mut()).await?;
    super::load::check(&report)?;

    Ok(Some(report.stats))
}

/// Check a `sha256=<hex>` signature of `body` against `secret`.
///
/// An empty secret accepts everything, signed or not.
fn verify_signature(secret: &[u8], signature: Option<&str>, body: &[u8]) -> Result<(), &'static str> {
    if secret.is_empty() {
        return Ok(());
    }

    let signature = signature.ok_or("missing signature")?;
    let hex_digest = signature
        .strip_prefix("sha256=")
        .ok_or("unsupported signature algorithm")?;
    let expected = hex::decode(hex_digest).map_err(|_| "malformed signature")?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| "unusable secret")?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| "signature mismatch")
}
