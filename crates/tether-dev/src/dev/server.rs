//! Stream server and session control endpoints.
//!
//! - `GET /stream` - ndjson feed of every bus event, completion snapshot first
//! - `POST /api/deploy` - publishes a `DeployRequestedEvent`
//! - `GET /api/env` - environment and command of one dev
//! - `GET /api/completed` - the completion snapshot

use crate::dev::SharedState;
use crate::error::{DevError, Result};
use crate::events::{CompleteEvent, DeployRequestedEvent};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use tether_bus::{Envelope, Event, NDJSON_CONTENT_TYPE};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Body of `GET /api/env`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvResponse {
    pub env: BTreeMap<String, String>,
    pub command: String,
}

/// Query of `GET /api/env`; `directory` is checked before `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvQuery {
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub name: String,
}

/// Dev session HTTP server.
pub struct DevServer {
    addr: SocketAddr,
    state: SharedState,
}

impl DevServer {
    pub fn new(addr: SocketAddr, state: SharedState) -> Self {
        Self { addr, state }
    }

    /// Binds the configured address and serves until the session is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::Server`] if the address cannot be bound.
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| DevError::Server(format!("Failed to bind to {}: {}", self.addr, e)))?;
        serve(listener, self.state).await
    }
}

/// Builds the router with all routes.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/stream", get(handle_stream))
        .route("/api/deploy", post(handle_deploy))
        .route("/api/env", get(handle_env))
        .route("/api/completed", get(handle_completed))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serves on an already bound listener until the session token fires.
pub async fn serve(listener: TcpListener, state: SharedState) -> Result<()> {
    let addr = listener.local_addr()?;
    let cancel = state.cancel_token().clone();
    tracing::info!(service = "dev", %addr, "dev server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| DevError::Server(format!("Server error: {}", e)))?;

    tracing::info!(service = "dev", %addr, "dev server stopped");
    Ok(())
}

fn encode_line(envelope: &Envelope) -> Option<Vec<u8>> {
    match envelope.to_line() {
        Ok(line) => Some(line),
        Err(err) => {
            tracing::warn!(service = "dev", kind = %envelope.kind, error = %err, "dropping unencodable event");
            None
        }
    }
}

fn snapshot_envelope(snapshot: &CompleteEvent) -> Option<Envelope> {
    match serde_json::to_value(snapshot) {
        Ok(event) => Some(Envelope {
            kind: CompleteEvent::KIND.to_string(),
            event,
        }),
        Err(err) => {
            tracing::warn!(service = "dev", error = %err, "failed to encode completion snapshot");
            None
        }
    }
}

/// Streams every bus event to one client.
///
/// The subscription is registered before the snapshot is read, so a
/// completion published in between may arrive twice but never zero times.
async fn handle_stream(State(state): State<SharedState>) -> Response {
    let mut subscription = state.bus().subscribe_all();
    let snapshot = state.snapshot();
    let cancel = state.cancel_token().clone();
    let client = subscription.id();
    tracing::info!(service = "dev", client, "stream subscribed");

    let body = async_stream::stream! {
        if let Some(line) = snapshot
            .as_deref()
            .and_then(snapshot_envelope)
            .and_then(|envelope| encode_line(&envelope))
        {
            yield Ok::<_, Infallible>(line);
        }

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                event = subscription.recv() => event,
            };
            let Some(event) = next else {
                break;
            };
            if let Some(line) = encode_line(&event.to_envelope()) {
                yield Ok(line);
            }
        }
        tracing::info!(service = "dev", client, "stream closed");
    };

    (
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

async fn handle_deploy(State(state): State<SharedState>) -> Response {
    tracing::info!(service = "dev", "deploy requested");
    match state.bus().publish(DeployRequestedEvent {}) {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn handle_env(
    State(state): State<SharedState>,
    Query(query): Query<EnvQuery>,
) -> Response {
    let Some(snapshot) = state.snapshot() else {
        tracing::info!(service = "dev", directory = %query.directory, "dev not found");
        return (StatusCode::NOT_FOUND, "dev not found").into_response();
    };

    let found = snapshot
        .devs
        .values()
        .find(|dev| dev_matches(state.cwd(), &dev.directory, &dev.name, &query));
    let Some(dev) = found else {
        tracing::info!(service = "dev", directory = %query.directory, "dev not found");
        return (StatusCode::NOT_FOUND, "dev not found").into_response();
    };

    match state.env_provider().env_for(&snapshot, &dev.name).await {
        Ok(env) => Json(EnvResponse {
            env,
            command: dev.command.clone(),
        })
        .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

fn dev_matches(cwd: &Path, directory: &str, name: &str, query: &EnvQuery) -> bool {
    if !query.directory.is_empty() && cwd.join(directory) == Path::new(&query.directory) {
        return true;
    }
    !query.name.is_empty() && name == query.name
}

async fn handle_completed(State(state): State<SharedState>) -> Json<CompleteEvent> {
    match state.snapshot() {
        Some(snapshot) => Json(snapshot.as_ref().clone()),
        None => Json(CompleteEvent::default()),
    }
}
