//! SQLite-backed `SubscriptionStore`.
//!
//! Every set is a group of rows in `set_members` sharing a `set_key`; the
//! composite primary key makes `add_member` idempotent.

use async_trait::async_trait;
use chrono::Utc;

use super::{StoreError, StoreResult, SubscriptionStore};
use crate::db::DbPool;

pub struct SqliteSubscriptionStore {
    db: DbPool,
}

impl SqliteSubscriptionStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn add_member(&self, key: &str, member: &str) -> StoreResult<()> {
        let db = self.db.clone();
        let key = key.to_string();
        let member = member.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            conn.execute(
                "INSERT OR IGNORE INTO set_members (set_key, member, added_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![key, member, Utc::now().to_rfc3339()],
            )?;
            Ok::<_, StoreError>(())
        })
        .await?
    }

    async fn is_member(&self, key: &str, member: &str) -> StoreResult<bool> {
        let db = self.db.clone();
        let key = key.to_string();
        let member = member.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let found: i64 = conn.query_row(
                "SELECT COUNT(*) FROM set_members WHERE set_key = ?1 AND member = ?2",
                rusqlite::params![key, member],
                |row| row.get(0),
            )?;
            Ok::<_, StoreError>(found > 0)
        })
        .await?
    }

    async fn health_check(&self) -> StoreResult<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok::<_, StoreError>(())
        })
        .await?
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_membership_roundtrip() {
        let store = SqliteSubscriptionStore::new(db::init_in_memory().unwrap());

        assert!(!store.is_member("user:subscriptions:alice", "room1").await.unwrap());
        store.add_member("user:subscriptions:alice", "room1").await.unwrap();
        assert!(store.is_member("user:subscriptions:alice", "room1").await.unwrap());
        assert!(!store.is_member("user:subscriptions:alice", "room2").await.unwrap());
        assert!(!store.is_member("user:subscriptions:bob", "room1").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_add_is_ignored() {
        let db = db::init_in_memory().unwrap();
        let store = SqliteSubscriptionStore::new(db.clone());

        store.add_member("k", "m").await.unwrap();
        store.add_member("k", "m").await.unwrap();

        let rows: i64 = db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM set_members WHERE set_key = 'k'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = SqliteSubscriptionStore::new(db::init_in_memory().unwrap());
        assert!(store.health_check().await.is_ok());
        assert_eq!(store.backend_name(), "sqlite");
    }
}
