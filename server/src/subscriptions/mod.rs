//! User/chat subscription sets.
//!
//! Subscriptions are stored as plain string sets behind the `SubscriptionStore`
//! capability. Two key families exist:
//! - `user:subscriptions:<user_id>` holds the chat ids a user may send to and
//!   receive from. This is the only family authorization reads.
//! - `chat:subscriptions:<chat_id>` is written by the subscription gateway and
//!   never read back here.

pub mod gateway;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

const USER_KEY_PREFIX: &str = "user:subscriptions:";
const CHAT_KEY_PREFIX: &str = "chat:subscriptions:";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Add `member` to the set at `key`. Adding an existing member is a no-op.
    async fn add_member(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn is_member(&self, key: &str, member: &str) -> StoreResult<bool>;
    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}

pub fn user_key(user_id: &str) -> String {
    format!("{}{}", USER_KEY_PREFIX, user_id)
}

pub fn chat_key(chat_id: &str) -> String {
    format!("{}{}", CHAT_KEY_PREFIX, chat_id)
}

/// Whether `user_id` is subscribed to `chat_id`.
/// Store errors are logged and read as "not subscribed".
pub async fn is_subscribed(store: &dyn SubscriptionStore, user_id: &str, chat_id: &str) -> bool {
    match store.is_member(&user_key(user_id), chat_id).await {
        Ok(member) => member,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                chat_id = %chat_id,
                error = %e,
                "Subscription lookup failed, treating as not subscribed"
            );
            false
        }
    }
}

/// Add `chat_id` to the user's subscription set.
pub async fn subscribe_user(
    store: &dyn SubscriptionStore,
    user_id: &str,
    chat_id: &str,
) -> StoreResult<()> {
    store.add_member(&user_key(user_id), chat_id).await
}
