use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{BrokerError, BrokerPublisher};

/// Collects published payloads in memory. Can be told to reject publishes.
#[derive(Default)]
pub struct MemoryBroker {
    published: Mutex<Vec<Vec<u8>>>,
    failing: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .map(|payloads| payloads.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerPublisher for MemoryBroker {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("publish rejected".to_string()));
        }
        self.published
            .lock()
            .map_err(|_| BrokerError::LockPoisoned)?
            .push(payload.to_vec());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("broker marked failing".to_string()));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
