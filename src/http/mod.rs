//! HTTP surface: ingestion API, subscriber WebSocket and health.
//!
//! - `GET /api/messages`: persisted messages
//! - `POST /api/messages`: submit `{sender, body}`
//! - `GET /ws`: live subscriber stream
//! - `GET /health`: lifecycle state

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ServerConfig;
use crate::gateway::IngestionGateway;
use crate::lifecycle::LifecycleState;
use crate::registry::SubscriberRegistry;

mod error;
mod messages;
mod websocket;

pub use error::{AppError, AppResult, ErrorResponse};
pub use messages::SubmitRequest;
pub use websocket::WsConnection;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<IngestionGateway>,
    pub registry: Arc<SubscriberRegistry>,
    pub lifecycle: watch::Receiver<LifecycleState>,
    /// Frames queued per subscriber before it counts as too slow.
    pub subscriber_buffer: usize,
}

impl AppState {
    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.borrow()
    }

    fn ensure_running(&self) -> AppResult<()> {
        match self.lifecycle_state() {
            LifecycleState::Running => Ok(()),
            other => Err(AppError::unavailable(format!("relay is {}", other))),
        }
    }
}

/// Build the axum router (separated for testing).
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route(
            "/api/messages",
            get(messages::list_messages).post(messages::submit_message),
        )
        .route("/ws", get(websocket::subscribe))
        .route("/health", get(health))
        .layer(cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: LifecycleState,
    subscribers: usize,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let status = state.lifecycle_state();
    let code = match status {
        LifecycleState::Running => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    let subscribers = state.registry.len().await;
    (code, Json(HealthResponse { status, subscribers }))
}

#[cfg(test)]
mod tests;
