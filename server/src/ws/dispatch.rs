//! Bounded fire-and-forget dispatch.
//!
//! Broker publishes go onto one bounded queue drained by a fixed pool of
//! workers. Recipient deliveries go onto each connection's own bounded queue.
//! Neither path ever waits: when a queue is full the work is dropped and
//! counted in `DispatchStats`.

use axum::extract::ws::Message;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::{ConnectionRegistry, DeliveryError};
use crate::broker::BrokerPublisher;

#[derive(Debug, Default)]
pub struct DispatchStats {
    published: AtomicU64,
    publish_failed: AtomicU64,
    publish_dropped: AtomicU64,
    delivered: AtomicU64,
    delivery_dropped: AtomicU64,
    delivery_failed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub published: u64,
    pub publish_failed: u64,
    pub publish_dropped: u64,
    pub publish_queued: u64,
    pub delivered: u64,
    pub delivery_dropped: u64,
    pub delivery_failed: u64,
    pub rejected: u64,
}

impl DispatchStats {
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

type PublishQueue = Arc<Mutex<mpsc::Receiver<Vec<u8>>>>;

#[derive(Clone)]
pub struct Dispatcher {
    publish_tx: mpsc::Sender<Vec<u8>>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Start `workers` publish workers sharing a queue of `queue_capacity` payloads.
    pub fn start(broker: Arc<dyn BrokerPublisher>, queue_capacity: usize, workers: usize) -> Self {
        let (publish_tx, publish_rx) = mpsc::channel(queue_capacity.max(1));
        // Workers take turns on the single receiver
        let queue: PublishQueue = Arc::new(Mutex::new(publish_rx));
        let stats = Arc::new(DispatchStats::default());

        for worker in 0..workers.max(1) {
            tokio::spawn(publish_worker(
                worker,
                queue.clone(),
                broker.clone(),
                stats.clone(),
            ));
        }

        tracing::debug!(
            backend = broker.backend_name(),
            workers = workers.max(1),
            queue_capacity = queue_capacity.max(1),
            "Publish workers started"
        );

        Self { publish_tx, stats }
    }

    /// Queue a payload for the broker. Returns false if it was dropped.
    pub fn publish(&self, payload: Vec<u8>) -> bool {
        // Never wait on the broker; a full queue drops this publish
        match self.publish_tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.publish_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Publish queue full, dropping broker publish");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.publish_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Publish workers gone, dropping broker publish");
                false
            }
        }
    }

    /// Queue `message` on one recipient's connection. Returns false if it was not queued.
    pub fn deliver(&self, connections: &ConnectionRegistry, user_id: &str, message: Message) -> bool {
        match connections.send(user_id, message) {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e @ DeliveryError::QueueFull(_)) => {
                self.stats.delivery_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(user_id = %user_id, error = %e, "Dropping delivery");
                false
            }
            Err(e) => {
                self.stats.delivery_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(user_id = %user_id, error = %e, "Error sending message to user");
                false
            }
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        let stats = &self.stats;
        // Free permits subtracted from the bound is what is still waiting
        let queued = self.publish_tx.max_capacity() - self.publish_tx.capacity();
        DispatchStatsSnapshot {
            published: DispatchStats::load(&stats.published),
            publish_failed: DispatchStats::load(&stats.publish_failed),
            publish_dropped: DispatchStats::load(&stats.publish_dropped),
            publish_queued: queued as u64,
            delivered: DispatchStats::load(&stats.delivered),
            delivery_dropped: DispatchStats::load(&stats.delivery_dropped),
            delivery_failed: DispatchStats::load(&stats.delivery_failed),
            rejected: DispatchStats::load(&stats.rejected),
        }
    }
}

async fn publish_worker(
    worker: usize,
    queue: PublishQueue,
    broker: Arc<dyn BrokerPublisher>,
    stats: Arc<DispatchStats>,
) {
    loop {
        // Hold the lock only while waiting for the next payload
        let next = queue.lock().await.recv().await;
        let Some(payload) = next else {
            // All senders dropped, dispatcher is gone
            break;
        };

        match broker.publish(&payload).await {
            Ok(()) => {
                stats.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.publish_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(worker, error = %e, "Failed to publish message");
            }
        }
    }

    tracing::debug!(worker, "Publish worker stopped");
}
