//! HTTP surface for the inbound message boundary.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::router::MessageRouter;

/// Shared state for the message routes.
#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<MessageRouter>,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub sender: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct InboundReply {
    pub reply: String,
}

/// POST /api/messages
///
/// Accepts (sender, text) and returns exactly one reply, synchronously.
async fn post_message(
    State(state): State<ApiState>,
    Json(message): Json<InboundMessage>,
) -> impl IntoResponse {
    if message.sender.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "sender is required"})),
        )
            .into_response();
    }

    let reply = state
        .router
        .handle_message(&message.sender, &message.text)
        .await;
    Json(InboundReply { reply }).into_response()
}

/// Build the message API routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/messages", post(post_message))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
