//! SQLite outbox broker.
//!
//! Each publish appends one row to `broker_outbox` tagged with the configured
//! queue name. Downstream consumers drain rows in `id` order. A background task
//! purges rows older than the retention window every cleanup interval.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

use super::{BrokerError, BrokerPublisher};
use crate::db::DbPool;

pub struct OutboxPublisher {
    db: DbPool,
    queue: String,
}

impl OutboxPublisher {
    pub fn new(db: DbPool, queue: impl Into<String>) -> Self {
        Self {
            db,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

#[async_trait]
impl BrokerPublisher for OutboxPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError> {
        let db = self.db.clone();
        let queue = self.queue.clone();
        let payload = payload.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| BrokerError::LockPoisoned)?;
            conn.execute(
                "INSERT INTO broker_outbox (queue, payload, enqueued_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![queue, payload, Utc::now().to_rfc3339()],
            )?;
            Ok::<_, BrokerError>(())
        })
        .await?
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| BrokerError::LockPoisoned)?;
            conn.query_row("SELECT COUNT(*) FROM broker_outbox", [], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok::<_, BrokerError>(())
        })
        .await?
    }

    fn backend_name(&self) -> &'static str {
        "sqlite-outbox"
    }
}

/// Delete outbox rows enqueued more than `retention_days` ago.
/// Returns the number of rows removed.
pub fn purge_expired(db: &DbPool, retention_days: u32) -> Result<usize, BrokerError> {
    let cutoff = (Utc::now() - ChronoDuration::days(i64::from(retention_days))).to_rfc3339();
    let conn = db.lock().map_err(|_| BrokerError::LockPoisoned)?;
    let removed = conn.execute(
        "DELETE FROM broker_outbox WHERE enqueued_at < ?1",
        rusqlite::params![cutoff],
    )?;
    Ok(removed)
}

/// Spawn the background outbox purge task.
pub fn spawn_outbox_cleanup(db: DbPool, retention_days: u32, interval_secs: u64) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;

            let db_clone = db.clone();
            let result =
                tokio::task::spawn_blocking(move || purge_expired(&db_clone, retention_days)).await;

            match result {
                Ok(Ok(count)) if count > 0 => {
                    tracing::info!("Purged {} expired broker outbox rows", count);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Failed to purge broker outbox: {}", e);
                }
                Err(e) => {
                    tracing::warn!("Broker outbox purge task failed: {}", e);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn queued(db: &DbPool) -> Vec<(String, Vec<u8>)> {
        let conn = db.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT queue, payload FROM broker_outbox ORDER BY id")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[tokio::test]
    async fn test_publish_appends_in_order() {
        let db = db::init_in_memory().unwrap();
        let broker = OutboxPublisher::new(db.clone(), "chats-queue");

        broker.publish(b"first").await.unwrap();
        broker.publish(b"second").await.unwrap();

        let rows = queued(&db);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ("chats-queue".to_string(), b"first".to_vec()));
        assert_eq!(rows[1].1, b"second".to_vec());
    }

    #[tokio::test]
    async fn test_purge_keeps_recent_rows() {
        let db = db::init_in_memory().unwrap();
        let broker = OutboxPublisher::new(db.clone(), "chats-queue");
        broker.publish(b"fresh").await.unwrap();

        {
            let conn = db.lock().unwrap();
            let old = (Utc::now() - ChronoDuration::days(30)).to_rfc3339();
            conn.execute(
                "INSERT INTO broker_outbox (queue, payload, enqueued_at) VALUES ('chats-queue', x'00', ?1)",
                rusqlite::params![old],
            )
            .unwrap();
        }

        let removed = purge_expired(&db, 7).unwrap();
        assert_eq!(removed, 1);
        let rows = queued(&db);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, b"fresh".to_vec());
    }

    #[tokio::test]
    async fn test_health_check() {
        let broker = OutboxPublisher::new(db::init_in_memory().unwrap(), "q");
        assert!(broker.health_check().await.is_ok());
        assert_eq!(broker.queue(), "q");
    }
}
