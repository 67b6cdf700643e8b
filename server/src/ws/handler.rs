use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the WebSocket endpoint.
/// Identity comes from the ingress layer as `?userId=<id>`.
#[derive(Debug, Default, Deserialize)]
pub struct WsConnectQuery {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

impl WsConnectQuery {
    fn identity(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// GET /ws?userId=<id>
///
/// Rejects a missing or empty identity with 400 before upgrading. Duplicate
/// identities are refused after the upgrade by the connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsConnectQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(user_id) = params.identity().map(str::to_string) else {
        tracing::warn!("WebSocket connection without userId");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Missing userId query parameter" })),
        )
            .into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(user_id = %user_id, error = %rejection, "WebSocket upgrade failed");
            return rejection.into_response();
        }
    };

    tracing::debug!(user_id = %user_id, "Upgrading WebSocket connection");
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_requires_non_empty_user_id() {
        let empty: WsConnectQuery = serde_json::from_str(r#"{"userId":""}"#).unwrap();
        assert_eq!(empty.identity(), None);

        let absent = WsConnectQuery::default();
        assert_eq!(absent.identity(), None);

        let alice: WsConnectQuery = serde_json::from_str(r#"{"userId":"alice"}"#).unwrap();
        assert_eq!(alice.identity(), Some("alice"));
    }
}
