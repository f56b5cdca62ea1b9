//! In-memory document store for tests and ephemeral deployments.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use veil_common::{ChatId, MessageId, UserHash};

use crate::{
    ChatRecord, DocumentStore, MessageRecord,
    error::{Result, StoreError},
};

/// DashMap-backed store with optional write-failure injection, used to
/// exercise the repository's retry and rollback paths.
#[derive(Default)]
pub struct MemoryStore {
    chats: DashMap<ChatId, ChatRecord>,
    messages: DashMap<MessageId, MessageRecord>,
    /// Number of upcoming writes that fail with a transient error.
    fail_writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write operations fail as transient.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        let remaining = self.fail_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get_chat(&self, chat_id: &ChatId) -> Result<Option<ChatRecord>> {
        Ok(self.chats.get(chat_id).map(|c| c.clone()))
    }

    async fn put_chat(&self, chat: &ChatRecord) -> Result<()> {
        self.check_write()?;
        self.chats.insert(chat.chat_id.clone(), chat.clone());
        Ok(())
    }

    async fn put_chat_with_message(&self, chat: &ChatRecord, msg: &MessageRecord) -> Result<()> {
        self.check_write()?;
        self.chats.insert(chat.chat_id.clone(), chat.clone());
        self.messages.insert(msg.message_id.clone(), msg.clone());
        Ok(())
    }

    async fn delete_chat(&self, chat_id: &ChatId) -> Result<()> {
        self.check_write()?;
        self.chats.remove(chat_id);
        self.messages.retain(|_, m| &m.chat_id != chat_id);
        Ok(())
    }

    async fn recent_chats(&self, user: &UserHash, limit: usize) -> Result<Vec<ChatRecord>> {
        let mut chats: Vec<ChatRecord> = self
            .chats
            .iter()
            .filter(|c| &c.user_hash == user)
            .map(|c| c.clone())
            .collect();
        chats.sort_by_key(|c| std::cmp::Reverse(c.updated_at));
        chats.truncate(limit);
        Ok(chats)
    }

    async fn chats_updated_since(&self, user: &UserHash, since: i64) -> Result<Vec<ChatRecord>> {
        let mut chats: Vec<ChatRecord> = self
            .chats
            .iter()
            .filter(|c| &c.user_hash == user && c.updated_at > since)
            .map(|c| c.clone())
            .collect();
        chats.sort_by_key(|c| c.updated_at);
        Ok(chats)
    }

    async fn chat_ids_for_user(&self, user: &UserHash) -> Result<Vec<ChatId>> {
        Ok(self
            .chats
            .iter()
            .filter(|c| &c.user_hash == user)
            .map(|c| c.chat_id.clone())
            .collect())
    }

    async fn put_message(&self, msg: &MessageRecord) -> Result<()> {
        self.check_write()?;
        self.messages.insert(msg.message_id.clone(), msg.clone());
        Ok(())
    }

    async fn chat_messages(&self, chat_id: &ChatId) -> Result<Vec<MessageRecord>> {
        let mut messages: Vec<MessageRecord> = self
            .messages
            .iter()
            .filter(|m| &m.chat_id == chat_id)
            .map(|m| m.clone())
            .collect();
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.message_id.as_str().cmp(b.message_id.as_str()))
        });
        Ok(messages)
    }

    async fn messages_updated_since(
        &self,
        user: &UserHash,
        since: i64,
    ) -> Result<Vec<MessageRecord>> {
        let mut messages: Vec<MessageRecord> = self
            .messages
            .iter()
            .filter(|m| &m.user_hash == user && m.updated_at > since)
            .map(|m| m.clone())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}
