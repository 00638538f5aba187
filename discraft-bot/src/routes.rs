//! HTTP routes.
//!
//! - `GET /health`, `GET /ready`: liveness and readiness
//! - `GET /link?user=<uuid>&secret=<code>`: called by the Minecraft plugin to
//!   finish an account link
//! - `GET /status?status=<text>`: set what the bot is shown playing

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::lang::BotTexts;
use crate::link::LinkBroker;
use crate::message::{ChannelMessage, OutgoingMessage};
use crate::traits::Channel;

const SERVICE_NAME: &str = "discraft-bot";
const MAX_BODY_BYTES: usize = 16 * 1024;
const MESSAGE_QUEUE_SIZE: usize = 100;

// ============================================================================
// State
// ============================================================================

/// Shared state for the HTTP server.
pub struct BotState {
    pub links: Arc<LinkBroker>,
    /// Link notices and bot status go through here
    pub channel: Arc<dyn Channel>,
    pub texts: BotTexts,
    /// Inbound chat messages; readiness follows this queue
    pub message_tx: mpsc::Sender<ChannelMessage>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    fn ok_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LinkQuery {
    user: Option<String>,
    secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    status: Option<String>,
}

// ============================================================================
// Health Routes
// ============================================================================

fn health_body(status: &'static str) -> Json<HealthResponse> {
    Json(HealthResponse {
        status,
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn health() -> impl IntoResponse {
    health_body("healthy")
}

async fn ready(State(state): State<Arc<BotState>>) -> impl IntoResponse {
    if state.message_tx.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, health_body("not_ready"));
    }
    (StatusCode::OK, health_body("ready"))
}

// ============================================================================
// Link Callback
// ============================================================================

async fn link(
    State(state): State<Arc<BotState>>,
    Query(query): Query<LinkQuery>,
) -> impl IntoResponse {
    let (Some(user), Some(secret)) = (query.user, query.secret) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failed("user and secret are required")),
        );
    };
    let Ok(minecraft_uuid) = Uuid::parse_str(user.trim()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failed("user must be a UUID")),
        );
    };

    // Runs to completion even if the client goes away.
    let links = state.links.clone();
    let completion =
        tokio::spawn(async move { links.complete_link(minecraft_uuid, &secret).await });

    let ticket = match completion.await {
        Ok(Ok(Some(ticket))) => ticket,
        Ok(Ok(None)) => {
            tracing::debug!(minecraft_uuid = %minecraft_uuid, "No link ticket matches");
            return (
                StatusCode::FORBIDDEN,
                Json(ApiResponse::failed("invalid or expired code")),
            );
        }
        Ok(Err(e)) => {
            tracing::error!(minecraft_uuid = %minecraft_uuid, error = %e, "Link completion failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failed("failed to store link")),
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Link completion task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failed("internal error")),
            );
        }
    };

    let notice = OutgoingMessage::direct(ticket.identity, state.texts.get("link.success"));
    if let Err(e) = state.channel.send(notice).await {
        tracing::warn!(user = %ticket.identity, error = %e, "Failed to send link notice");
    }

    (StatusCode::OK, Json(ApiResponse::ok()))
}

// ============================================================================
// Bot Status
// ============================================================================

async fn status(
    State(state): State<Arc<BotState>>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    let Some(status) = query.status else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failed("status is required")),
        );
    };
    let status = status.trim().to_string();
    let activity = (!status.is_empty()).then(|| status.clone());

    if let Err(e) = state.channel.set_presence(activity).await {
        tracing::warn!(channel = state.channel.name(), error = %e, "Failed to set bot status");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::failed("could not set status")),
        );
    }

    tracing::info!(status = %status, "Set bot status");
    (
        StatusCode::OK,
        Json(ApiResponse::ok_with(format!("Set bot status to: {status}"))),
    )
}

// ============================================================================
// Router Builder
// ============================================================================

/// Build the HTTP router.
pub fn build_router(state: Arc<BotState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/link", get(link))
        .route("/status", get(status))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create the HTTP state together with the inbound message queue.
pub fn create_state(
    links: Arc<LinkBroker>,
    channel: Arc<dyn Channel>,
    texts: BotTexts,
) -> (Arc<BotState>, mpsc::Receiver<ChannelMessage>) {
    let (tx, rx) = mpsc::channel(MESSAGE_QUEUE_SIZE);

    let state = Arc::new(BotState {
        links,
        channel,
        texts,
        message_tx: tx,
    });

    (state, rx)
}
