use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::state::AppState;
use crate::subscriptions::gateway;
use crate::ws::handler as ws_handler;

/// Build the full axum Router.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (identity via ?userId=)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let api_routes = Router::new()
        .route("/subscribe", post(gateway::handle_subscribe))
        .route("/api/stats", get(stats));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .merge(health)
        .with_state(state)
}

/// GET /api/stats: dispatch counters plus the live connection count.
async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.dispatcher.snapshot();
    let mut body = serde_json::to_value(snapshot).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(fields) = body.as_object_mut() {
        fields.insert(
            "connections".to_string(),
            serde_json::json!(state.connections.len()),
        );
    }
    Json(body)
}

/// Reports "ok" while both backends answer their health checks.
async fn health_check(State(state): State<AppState>) -> Response {
    if let Err(e) = state.store.health_check().await {
        tracing::warn!(error = %e, "Subscription store health check failed");
        return (StatusCode::SERVICE_UNAVAILABLE, "subscription store unavailable").into_response();
    }
    if let Err(e) = state.broker.health_check().await {
        tracing::warn!(error = %e, "Broker health check failed");
        return (StatusCode::SERVICE_UNAVAILABLE, "broker unavailable").into_response();
    }
    "ok".into_response()
}
