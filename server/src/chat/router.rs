//! Per-message routing: parse, stamp, resolve, auto-subscribe, authorize,
//! encode, then publish and broadcast.
//!
//! The router holds no per-message state of its own. Everything it reads or
//! writes lives in the subscription store and the connection registry.

use axum::extract::ws::Message;
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

use crate::chat::message::{ErrorFrame, InboundMessage};
use crate::subscriptions::{is_subscribed, subscribe_user, SubscriptionStore};
use crate::ws::dispatch::Dispatcher;
use crate::ws::ConnectionRegistry;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Invalid JSON format")]
    Malformed(#[source] serde_json::Error),
    #[error("Sender {sender} is not subscribed to chat {chat_id}. Message blocked.")]
    NotSubscribed { sender: String, chat_id: String },
    #[error("Failed to encode outbound message")]
    Encode(#[source] serde_json::Error),
}

impl RouteError {
    /// JSON error frame for the sender.
    pub fn to_frame(&self) -> String {
        ErrorFrame::encode(self.to_string())
    }
}

/// Result of a message that made it through authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub chat_id: String,
    /// True when the chat id was generated for this message
    pub new_chat: bool,
    /// False when the publish queue was full
    pub publish_queued: bool,
    /// Connections the message was queued on
    pub recipients: usize,
}

pub struct MessageRouter {
    store: Arc<dyn SubscriptionStore>,
    connections: ConnectionRegistry,
    dispatcher: Dispatcher,
    fanout_concurrency: usize,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        connections: ConnectionRegistry,
        dispatcher: Dispatcher,
        fanout_concurrency: usize,
    ) -> Self {
        Self {
            store,
            connections,
            dispatcher,
            fanout_concurrency: fanout_concurrency.max(1),
        }
    }

    /// Route one inbound payload from the authenticated `sender`.
    ///
    /// On `Err` nothing was published or broadcast; the caller reports the
    /// error to the sender only.
    pub async fn route(&self, sender: &str, raw: &[u8]) -> Result<Routed, RouteError> {
        let inbound: InboundMessage = serde_json::from_slice(raw).map_err(|e| {
            tracing::warn!(user_id = %sender, error = %e, "Error unmarshalling message");
            RouteError::Malformed(e)
        })?;

        let (chat_id, new_chat) = match inbound.requested_chat_id() {
            Some(id) => (id.to_string(), false),
            None => (uuid::Uuid::new_v4().to_string(), true),
        };
        if new_chat {
            tracing::info!(user_id = %sender, chat_id = %chat_id, "Starting new chat");
        }

        if !inbound.subscriber_hints().is_empty() {
            self.auto_subscribe(sender, inbound.subscriber_hints(), &chat_id)
                .await;
        }

        if !is_subscribed(self.store.as_ref(), sender, &chat_id).await {
            self.dispatcher.stats().record_rejected();
            tracing::warn!(
                user_id = %sender,
                chat_id = %chat_id,
                "Sender not subscribed to chat, message blocked"
            );
            return Err(RouteError::NotSubscribed {
                sender: sender.to_string(),
                chat_id,
            });
        }

        let outbound = inbound.into_outbound(chat_id.clone(), sender);
        let payload = serde_json::to_string(&outbound).map_err(RouteError::Encode)?;

        // Both legs run regardless of how the other fares
        let publish_queued = self.dispatcher.publish(payload.clone().into_bytes());
        let recipients = self.broadcast(&chat_id, payload).await;

        tracing::debug!(
            user_id = %sender,
            chat_id = %chat_id,
            recipients,
            "Chat message routed"
        );

        Ok(Routed {
            chat_id,
            new_chat,
            publish_queued,
            recipients,
        })
    }

    /// Subscribe the sender and every hinted user to `chat_id`.
    /// A failed write is logged and does not stop the others.
    async fn auto_subscribe(&self, sender: &str, hinted: &[String], chat_id: &str) {
        let mut members: BTreeSet<&str> = hinted
            .iter()
            .map(String::as_str)
            .filter(|id| !id.is_empty())
            .collect();
        members.insert(sender);

        let store = self.store.as_ref();
        let results = join_all(members.into_iter().map(|user_id| async move {
            (user_id, subscribe_user(store, user_id, chat_id).await)
        }))
        .await;

        for (user_id, result) in results {
            match result {
                Ok(()) if user_id != sender => {
                    tracing::info!(user_id = %user_id, chat_id = %chat_id, "Auto-subscribed user to chat");
                }
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        chat_id = %chat_id,
                        error = %e,
                        "Failed to auto-subscribe user"
                    );
                }
            }
        }
    }

    /// Queue `payload` on every live connection whose user is subscribed to
    /// `chat_id` right now. Returns the number of connections it was queued on.
    pub async fn broadcast(&self, chat_id: &str, payload: String) -> usize {
        let mut connected = Vec::with_capacity(self.connections.len());
        self.connections
            .for_each_connected(|user_id, _| connected.push(user_id.to_string()));

        let store = self.store.as_ref();
        let recipients: Vec<String> = stream::iter(connected)
            .map(|user_id| async move {
                let subscribed = is_subscribed(store, &user_id, chat_id).await;
                (user_id, subscribed)
            })
            .buffer_unordered(self.fanout_concurrency)
            .filter_map(|(user_id, subscribed)| async move { subscribed.then_some(user_id) })
            .collect()
            .await;

        let message = Message::Text(payload.into());
        recipients
            .iter()
            .filter(|user_id| {
                self.dispatcher
                    .deliver(&self.connections, user_id, message.clone())
            })
            .count()
    }
}
