//! Webhook ingestor
//!
//! Routes:
//! - `POST /webhook` - push notification receiver
//! - `GET  /healthz` - liveness and counters
//!
//! The webhook handler never waits for fetch, diff or upload. For every
//! change in the push it reserves a dispatch slot, records the commit in the
//! ledger, and queues it. A persisted ledger is written on the blocking pool
//! before the response goes out.

use crate::dispatch::Dispatcher;
use crate::error::SyncError;
use crate::ledger::CommitLedger;
use crate::types::PushEvent;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<CommitLedger>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(ledger: Arc<CommitLedger>, dispatcher: Dispatcher) -> Self {
        Self { ledger, dispatcher }
    }
}

/// Body of a successful `POST /webhook`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookResponse {
    /// Hashes queued for processing by this delivery
    pub accepted: Vec<String>,
    /// Hashes that had already been accepted earlier
    pub duplicates: Vec<String>,
}

/// Body of `GET /healthz`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub commit: String,
    pub built_at: String,
    pub processed_commits: usize,
    pub queued_commits: usize,
}

/// Build the axum [`Router`] with all routes and shared state
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/healthz", get(handle_health))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Webhook server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}

/// `POST /webhook`
#[instrument(skip(state, body), fields(bytes = body.len()))]
async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let event = PushEvent::from_slice(&body)?;
    let mut response = WebhookResponse::default();

    // Commits accepted before a full queue are written too
    let queued = accept_commits(&state, event, &mut response);

    if !response.accepted.is_empty()
        && let Err(e) = Arc::clone(&state.ledger).persist().await
    {
        // The in-memory set still holds the hashes for this process
        warn!(error = %e, "Failed to persist commit ledger");
    }

    queued?;
    Ok(Json(response))
}

fn accept_commits(
    state: &AppState,
    event: PushEvent,
    response: &mut WebhookResponse,
) -> Result<(), SyncError> {
    for commit in event.commits() {
        // Slot first: a full queue must not leave a ledger entry behind
        let permit = state.dispatcher.try_reserve()?;

        if !state.ledger.try_acquire(&commit.hash)? {
            info!(commit = %commit.hash, "Duplicate commit ignored");
            response.duplicates.push(commit.hash);
            continue;
        }

        info!(commit = %commit.hash, href = %commit.commits_href, "Commit accepted");
        response.accepted.push(commit.hash.clone());
        // Completion is logged by the task itself
        drop(permit.dispatch(commit));
    }
    Ok(())
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.dispatcher.is_closed() {
        "draining"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: crate::VERSION.to_string(),
        commit: crate::GIT_COMMIT.to_string(),
        built_at: crate::BUILD_TIMESTAMP.to_string(),
        processed_commits: state.ledger.len(),
        queued_commits: state.dispatcher.queued(),
    })
}

/// Handler errors mapped onto HTTP responses
///
/// Payload errors are the caller's fault (400). A full or closing dispatcher
/// is temporary (503) so the notifier retries the delivery later. Anything
/// else is a 500.
#[derive(Debug)]
pub struct AppError(SyncError);

impl<E> From<E> for AppError
where
    E: Into<SyncError>,
{
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_user_error() {
            StatusCode::BAD_REQUEST
        } else if matches!(self.0, SyncError::Dispatch(_)) {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self.0, "Webhook handling failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Webhook refused");
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}
