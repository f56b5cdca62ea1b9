//! Document store: the durable system of record for persisted chats and
//! messages.
//!
//! The sync core only ever talks to the [`DocumentStore`] trait. Two backends
//! ship with the workspace: SQLite ([`sqlite::SqliteStore`]) and an in-memory
//! store for tests ([`memory::MemoryStore`]). Chats reach the store only once
//! they hold at least one synced message; drafts never do.
//!
//! Layout at the interface boundary: chats keyed by `chat_id` with a
//! secondary index on `(user_hash, updated_at)`; messages keyed by
//! `message_id` with secondary indexes on `(chat_id, created_at)` and
//! `(user_hash, updated_at)`.

pub mod error;
pub mod memory;
pub mod retry;
pub mod sqlite;

use serde::{Deserialize, Serialize};

use veil_common::{ChatId, MessageId, UserHash};

pub use {
    error::{Result, StoreError},
    memory::MemoryStore,
    retry::with_retry,
    sqlite::SqliteStore,
};

// ── Persisted record shapes ──────────────────────────────────────────────────

/// A chat row as persisted. Drafts are deliberately absent: draft content and
/// `draft_v` are cache-resident only and die with the hot entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub chat_id: ChatId,
    pub user_hash: UserHash,
    pub vault_key_ref: String,
    pub encrypted_title: Option<String>,
    pub title_v: u64,
    pub messages_v: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_message_at: Option<i64>,
    pub last_edited_at: i64,
}

/// A message row as persisted. Only messages that reached `synced` are ever
/// written, so the record carries no status column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub user_hash: UserHash,
    pub sender: String,
    pub encrypted_content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Store trait ──────────────────────────────────────────────────────────────

/// Typed operations over the system of record.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_chat(&self, chat_id: &ChatId) -> Result<Option<ChatRecord>>;

    /// Insert or replace a chat row.
    async fn put_chat(&self, chat: &ChatRecord) -> Result<()>;

    /// Write a chat row and a message row in one transaction. This is the
    /// path that makes a version bump atomic with its payload.
    async fn put_chat_with_message(&self, chat: &ChatRecord, msg: &MessageRecord) -> Result<()>;

    /// Remove a chat and all of its messages. Idempotent.
    async fn delete_chat(&self, chat_id: &ChatId) -> Result<()>;

    /// A user's chats ordered by `updated_at` descending.
    async fn recent_chats(&self, user: &UserHash, limit: usize) -> Result<Vec<ChatRecord>>;

    /// Ranged read backing delta sync: all of a user's chats with
    /// `updated_at > since`.
    async fn chats_updated_since(&self, user: &UserHash, since: i64) -> Result<Vec<ChatRecord>>;

    /// All chat ids a user owns. Drives deletion detection.
    async fn chat_ids_for_user(&self, user: &UserHash) -> Result<Vec<ChatId>>;

    async fn put_message(&self, msg: &MessageRecord) -> Result<()>;

    /// A chat's messages ordered by `created_at` ascending.
    async fn chat_messages(&self, chat_id: &ChatId) -> Result<Vec<MessageRecord>>;

    /// Ranged read backing delta sync: all of a user's messages with
    /// `updated_at > since`.
    async fn messages_updated_since(&self, user: &UserHash, since: i64)
    -> Result<Vec<MessageRecord>>;
}
