pub mod actor;
pub mod dispatch;
pub mod handler;

use axum::extract::ws::Message;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Sender half of a connection's bounded outbound queue.
/// The connection's writer task owns the receiver and the WebSocket sink.
pub type ConnectionSender = mpsc::Sender<Message>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("user {0} is not connected")]
    NotConnected(String),
    #[error("outbound queue for user {0} is full")]
    QueueFull(String),
    #[error("connection for user {0} is closed")]
    Closed(String),
}

/// Live connections, at most one per user id.
///
/// The map itself is never handed out. Callers attach, detach, send, or visit
/// a snapshot.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, ConnectionSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sender` under `user_id`.
    /// Returns false, leaving the registry untouched, if the user already has
    /// a live connection. The first connection wins.
    pub fn attach(&self, user_id: &str, sender: ConnectionSender) -> bool {
        match self.connections.entry(user_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(sender);
                true
            }
        }
    }

    /// Remove the entry for `user_id` if there is one.
    pub fn detach(&self, user_id: &str) {
        self.connections.remove(user_id);
    }

    /// Queue `message` on the user's connection without waiting.
    pub fn send(&self, user_id: &str, message: Message) -> Result<(), DeliveryError> {
        // Clone the sender out so the shard lock is released before sending
        let sender = self
            .connections
            .get(user_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DeliveryError::NotConnected(user_id.to_string()))?;

        sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull(user_id.to_string()),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(user_id.to_string()),
        })
    }

    /// Visit every connection registered at the time of the call.
    /// Attaches and detaches that happen during the visit are not observed.
    pub fn for_each_connected(&self, mut visit: impl FnMut(&str, &ConnectionSender)) {
        for (user_id, sender) in self.snapshot() {
            visit(&user_id, &sender);
        }
    }

    fn snapshot(&self) -> Vec<(String, ConnectionSender)> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
