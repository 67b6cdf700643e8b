//! Durable hand-off of outbound chat messages to downstream consumers.
//!
//! The router only sees the `BrokerPublisher` capability: publish opaque bytes,
//! no acknowledgment, no retry. `outbox::OutboxPublisher` is the durable
//! implementation; `memory::MemoryBroker` captures payloads in-process.

pub mod memory;
pub mod outbox;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError>;
    async fn health_check(&self) -> Result<(), BrokerError>;
    fn backend_name(&self) -> &'static str;
}
