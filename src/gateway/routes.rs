//! HTTP + WebSocket routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{Html, IntoResponse},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::dashboard;
use super::model::{
    ApiResponse, ConfigRequest, DecryptRequest, DecryptResponse, QueryRequest, QueryResponse,
    ReplyRequest,
};
use super::service::Gateway;
use crate::broadcast::Subscription;
use crate::error::ApiError;

/// Build the Axum router for the whole gateway surface.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/dashboard", get(dashboard_page))
        .route("/dashboard/status", get(dashboard_status))
        .route("/config", get(get_config))
        .route("/config/{name}", post(update_config))
        .route("/reply", post(reply))
        .route("/query", post(query))
        .route("/decrypt", post(decrypt))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

/// Map a body parse failure onto the `{message}` error shape.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

// ── Dashboard ───────────────────────────────────────────────────────────

async fn dashboard_page(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let settings = gateway.config().await;
    Html(dashboard::render(&settings.bot_name))
}

async fn dashboard_status(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.status().await)
}

// ── Config ──────────────────────────────────────────────────────────────

async fn get_config(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.config().await)
}

async fn update_config(
    State(gateway): State<Arc<Gateway>>,
    Path(name): Path<String>,
    payload: Result<Json<ConfigRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let req = body(payload)?;
    gateway.update_config(&name, &req).await?;
    Ok(Json(ApiResponse::ok()))
}

// ── Reply ───────────────────────────────────────────────────────────────

async fn reply(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<ReplyRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let req = body(payload)?;
    gateway.submit_reply(&req)?;
    Ok(Json(ApiResponse::ok()))
}

// ── Query / Decrypt ─────────────────────────────────────────────────────

async fn query(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let req = body(payload)?;
    let data = gateway.query(&req).await?;
    Ok(Json(QueryResponse { data }))
}

async fn decrypt(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<DecryptRequest>, JsonRejection>,
) -> Result<Json<DecryptResponse>, ApiError> {
    let req = body(payload)?;
    let plain_text = gateway.decrypt(&req).await?;
    Ok(Json(DecryptResponse { plain_text }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    debug!("WebSocket client connecting");
    ws.on_upgrade(move |socket| {
        let subscription = gateway.subscribe_events();
        handle_socket(socket, subscription)
    })
}

/// Forward every published event to the client until either side goes away.
async fn handle_socket(mut socket: WebSocket, mut subscription: Subscription) {
    let id = subscription.id();
    info!(subscriber = %id, "WebSocket client connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        if socket.send(Message::Text(event.as_str().to_owned().into())).await.is_err() {
                            debug!(subscriber = %id, "Client disconnected during send");
                            break;
                        }
                    }
                    None => {
                        warn!(subscriber = %id, "Subscription dropped by hub");
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            // No client-to-server protocol; only watch for close and keepalives.
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(subscriber = %id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(subscriber = %id, "WebSocket connection closed");
}
