use std::sync::Arc;

use crate::broker::BrokerPublisher;
use crate::chat::router::MessageRouter;
use crate::config::{ChatSetMembers, DispatchConfig, KeepaliveConfig};
use crate::subscriptions::SubscriptionStore;
use crate::ws::dispatch::Dispatcher;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Live WebSocket connections, one per user id
    pub connections: ConnectionRegistry,
    /// User and chat subscription sets
    pub store: Arc<dyn SubscriptionStore>,
    /// Downstream message hand-off
    pub broker: Arc<dyn BrokerPublisher>,
    /// Publish queue, worker pool and dispatch counters
    pub dispatcher: Dispatcher,
    pub router: Arc<MessageRouter>,
    /// What POST /subscribe writes into the per-chat set
    pub chat_set_members: ChatSetMembers,
    pub keepalive: KeepaliveConfig,
    /// Outbound frames buffered per connection
    pub connection_queue_capacity: usize,
}

impl AppState {
    /// Wire up the registry, dispatcher and router around the given backends.
    /// Starts the publish workers, so it must run inside a Tokio runtime.
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        broker: Arc<dyn BrokerPublisher>,
        chat_set_members: ChatSetMembers,
        dispatch: &DispatchConfig,
        keepalive: KeepaliveConfig,
    ) -> Self {
        let connections = ConnectionRegistry::new();
        let dispatcher = Dispatcher::start(
            broker.clone(),
            dispatch.publish_queue_capacity,
            dispatch.publish_workers,
        );
        let router = Arc::new(MessageRouter::new(
            store.clone(),
            connections.clone(),
            dispatcher.clone(),
            dispatch.fanout_concurrency,
        ));

        Self {
            connections,
            store,
            broker,
            dispatcher,
            router,
            chat_set_members,
            keepalive,
            connection_queue_capacity: dispatch.connection_queue_capacity,
        }
    }
}
