use crate::auth::middleware::authorization_token;
use crate::auth::secrets_match;
use crate::protocol::{close_codes, ServerMessage};
use crate::server::GatewayServer;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Require `Authorization: Bearer <admin_token>` when an admin token is configured.
pub(super) fn enforce_admin_auth(
    headers: &HeaderMap,
    server: &GatewayServer,
) -> Result<(), StatusCode> {
    let Some(expected) = server.config().security.admin_token() else {
        return Ok(());
    };

    let Some(token) = authorization_token(headers) else {
        tracing::warn!("Unauthorized admin access attempt: missing bearer token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    if secrets_match(token, expected) {
        tracing::debug!("Admin access authorized via bearer token");
        Ok(())
    } else {
        tracing::warn!("Unauthorized admin access attempt: token rejected");
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// `GET /ws/stats`
pub async fn websocket_stats(
    headers: HeaderMap,
    State(server): State<Arc<GatewayServer>>,
) -> axum::response::Result<Json<Value>> {
    enforce_admin_auth(&headers, &server)?;
    let stats = server.connections().statistics().await;
    Ok(Json(json!({
        "success": true,
        "stats": stats,
        "metrics": server.metrics().snapshot(),
    })))
}

/// `GET /ws/sessions`
pub async fn list_sessions(
    headers: HeaderMap,
    State(server): State<Arc<GatewayServer>>,
) -> axum::response::Result<Json<Value>> {
    enforce_admin_auth(&headers, &server)?;
    let sessions = server.connections().list_sessions().await;
    Ok(Json(json!({
        "success": true,
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

/// `DELETE /ws/sessions/{session_id}`
pub async fn disconnect_session(
    headers: HeaderMap,
    State(server): State<Arc<GatewayServer>>,
    Path(session_id): Path<Uuid>,
) -> axum::response::Result<Json<Value>> {
    enforce_admin_auth(&headers, &server)?;
    let removed = server
        .connections()
        .force_disconnect(session_id, close_codes::GOING_AWAY, "Disconnected by administrator")
        .await;
    if !removed {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "message": format!("Session {session_id} not found"),
            })),
        )
            .into());
    }

    tracing::info!(%session_id, "Session disconnected by administrator");
    Ok(Json(json!({
        "success": true,
        "message": format!("Session {session_id} disconnected"),
    })))
}

/// `POST /ws/broadcast`: the body's `data` (or the whole body when it has
/// none) goes out as an `announcement`.
pub async fn broadcast_announcement(
    headers: HeaderMap,
    State(server): State<Arc<GatewayServer>>,
    Json(body): Json<Value>,
) -> axum::response::Result<Json<Value>> {
    enforce_admin_auth(&headers, &server)?;
    let payload = match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    let delivered = server
        .connections()
        .broadcast(ServerMessage::Announcement(payload), &[])
        .await;
    tracing::info!(delivered, "Broadcast announcement");
    Ok(Json(json!({
        "success": true,
        "message": "Broadcast sent",
        "delivered": delivered,
    })))
}
