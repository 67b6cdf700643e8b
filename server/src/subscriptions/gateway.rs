//! Out-of-band subscription registration (POST /subscribe).
//!
//! Lets a caller attach a user to a chat without sending a message. The user
//! set write and the chat set write are independent: if the second fails the
//! first stays in place.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use super::{chat_key, user_key, StoreError, SubscriptionStore};
use crate::config::ChatSetMembers;
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("user_id is required")]
    MissingUserId,
    #[error("failed to save subscription for user {user_id}: {source}")]
    Store {
        user_id: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub message: String,
    pub chat_id: String,
}

/// Subscribe `user_id` to `chat_id`, generating a chat id when none is given.
/// Returns the resolved chat id.
pub async fn subscribe(
    store: &dyn SubscriptionStore,
    chat_set_members: ChatSetMembers,
    user_id: &str,
    chat_id: Option<&str>,
) -> Result<String, GatewayError> {
    if user_id.is_empty() {
        return Err(GatewayError::MissingUserId);
    }

    let chat_id = match chat_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    };

    let store_err = |source| GatewayError::Store {
        user_id: user_id.to_string(),
        source,
    };

    store
        .add_member(&user_key(user_id), &chat_id)
        .await
        .map_err(store_err)?;

    let chat_member = match chat_set_members {
        ChatSetMembers::ChatId => chat_id.as_str(),
        ChatSetMembers::UserId => user_id,
    };
    store
        .add_member(&chat_key(&chat_id), chat_member)
        .await
        .map_err(store_err)?;

    Ok(chat_id)
}

/// POST /subscribe
/// Body: {"user_id": "...", "chat_id": "..."?}
pub async fn handle_subscribe(
    State(state): State<AppState>,
    body: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<Json<SubscribeResponse>, (StatusCode, Json<Value>)> {
    let Json(req) = body.map_err(|rejection| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": rejection.body_text() })),
        )
    })?;

    let user_id = req.user_id.unwrap_or_default();

    match subscribe(
        state.store.as_ref(),
        state.chat_set_members,
        &user_id,
        req.chat_id.as_deref(),
    )
    .await
    {
        Ok(chat_id) => {
            tracing::info!(user_id = %user_id, chat_id = %chat_id, "Subscription registered");
            Ok(Json(SubscribeResponse {
                message: format!(
                    "User {} subscribed to chat {} successfully.",
                    user_id, chat_id
                ),
                chat_id,
            }))
        }
        Err(GatewayError::MissingUserId) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "user_id is required" })),
        )),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Subscription write failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to save subscription" })),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::memory::MemorySubscriptionStore;

    #[tokio::test]
    async fn test_subscribe_with_explicit_chat() {
        let store = MemorySubscriptionStore::new();
        let chat_id = subscribe(&store, ChatSetMembers::ChatId, "alice", Some("room1"))
            .await
            .unwrap();

        assert_eq!(chat_id, "room1");
        assert_eq!(store.members("user:subscriptions:alice"), vec!["room1"]);
        // legacy layout: the chat set holds the chat id itself
        assert_eq!(store.members("chat:subscriptions:room1"), vec!["room1"]);
    }

    #[tokio::test]
    async fn test_subscribe_generates_chat_id() {
        let store = MemorySubscriptionStore::new();
        let chat_id = subscribe(&store, ChatSetMembers::ChatId, "alice", None)
            .await
            .unwrap();
        assert!(uuid::Uuid::parse_str(&chat_id).is_ok());

        let empty = subscribe(&store, ChatSetMembers::ChatId, "alice", Some(""))
            .await
            .unwrap();
        assert!(uuid::Uuid::parse_str(&empty).is_ok());
        assert_ne!(chat_id, empty);
    }

    #[tokio::test]
    async fn test_subscribe_user_id_chat_set_layout() {
        let store = MemorySubscriptionStore::new();
        subscribe(&store, ChatSetMembers::UserId, "alice", Some("room1"))
            .await
            .unwrap();
        assert_eq!(store.members("chat:subscriptions:room1"), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_missing_user_id_touches_nothing() {
        let store = MemorySubscriptionStore::new();
        let result = subscribe(&store, ChatSetMembers::ChatId, "", Some("room1")).await;
        assert!(matches!(result, Err(GatewayError::MissingUserId)));
        assert!(store.members("chat:subscriptions:room1").is_empty());
    }

    #[tokio::test]
    async fn test_chat_set_failure_keeps_user_set_write() {
        let store = MemorySubscriptionStore::new();
        store.fail_writes_for_key("chat:subscriptions:room1");

        let result = subscribe(&store, ChatSetMembers::ChatId, "alice", Some("room1")).await;
        assert!(matches!(result, Err(GatewayError::Store { .. })));
        assert_eq!(store.members("user:subscriptions:alice"), vec!["room1"]);
    }
}
