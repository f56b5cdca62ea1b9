//! Chat repository: the single read/write facade over version arbiter,
//! cache tiers, and document store.
//!
//! Writes to the same chat are serialized through a per-chat mutex, which is
//! what makes the arbiter's read–compare–increment correct under concurrent
//! devices. Mutations follow write-through order: document store first (with
//! deadline + bounded retries), cache after, so a store failure never leaves
//! the cache ahead of the record of truth. Draft state is the exception by
//! design — it is cache-resident only and never reaches the store.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use {dashmap::DashMap, tokio::sync::Mutex, tracing::debug};

use {
    veil_common::{ChatId, MessageId, UserHash, now_ms},
    veil_config::{CacheConfig, StoreConfig},
    veil_protocol::{ComponentVersions, MessageStatus},
    veil_store::{DocumentStore, with_retry},
    veil_vault::SecretStore,
};

use crate::{
    arbiter::{self, VersionCheck},
    cache::ChatCache,
    delta::{Delta, build_delta},
    error::{ChatError, Result},
    model::{Chat, Message},
};

pub struct ChatRepository {
    store: Arc<dyn DocumentStore>,
    vault: Arc<dyn SecretStore>,
    cache: ChatCache,
    /// Per-chat write serialization.
    locks: DashMap<ChatId, Arc<Mutex<()>>>,
    store_cfg: StoreConfig,
}

impl ChatRepository {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        vault: Arc<dyn SecretStore>,
        cache_cfg: &CacheConfig,
        store_cfg: StoreConfig,
    ) -> Self {
        Self {
            store,
            vault,
            cache: ChatCache::new(cache_cfg),
            locks: DashMap::new(),
            store_cfg,
        }
    }

    /// Map a client-supplied chat id onto the canonical owner-prefixed form.
    pub fn resolve_chat_id(&self, user: &UserHash, raw: &str) -> ChatId {
        ChatId::resolve(user, raw)
    }

    fn chat_lock(&self, chat_id: &ChatId) -> Arc<Mutex<()>> {
        self.locks
            .entry(chat_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ── Store access with failure policy ─────────────────────────────────

    async fn store_get_chat(&self, chat_id: &ChatId) -> Result<Option<veil_store::ChatRecord>> {
        Ok(with_retry(
            "get_chat",
            self.store_cfg.timeout_ms,
            self.store_cfg.retry,
            || self.store.get_chat(chat_id),
        )
        .await?)
    }

    async fn store_put_chat(&self, chat: &Chat) -> Result<()> {
        let record = chat.to_record();
        Ok(with_retry(
            "put_chat",
            self.store_cfg.timeout_ms,
            self.store_cfg.retry,
            || self.store.put_chat(&record),
        )
        .await?)
    }

    // ── Read paths ───────────────────────────────────────────────────────

    /// Chat metadata, read through hot → warm → store. Returns `None` for
    /// chats that do not exist or are owned by someone else; callers cannot
    /// distinguish the two.
    pub async fn get_chat(&self, user: &UserHash, chat_id: &ChatId) -> Result<Option<Chat>> {
        if let Some((chat, _)) = self.cache.get_hot(user, chat_id) {
            return Ok(Some(chat));
        }
        if let Some(chat) = self.cache.get_warm(user, chat_id) {
            return Ok(Some(chat));
        }
        match self.store_get_chat(chat_id).await? {
            Some(record) if record.user_hash == *user => {
                let chat = Chat::from_record(record);
                self.cache.put_warm(chat.clone());
                Ok(Some(chat))
            },
            _ => Ok(None),
        }
    }

    /// Full chat with messages, read through the hot tier and populating it
    /// on miss.
    pub async fn get_chat_with_messages(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
    ) -> Result<Option<(Chat, Vec<Message>)>> {
        if let Some(entry) = self.cache.get_hot(user, chat_id) {
            return Ok(Some(entry));
        }

        let Some(record) = self.store_get_chat(chat_id).await? else {
            return Ok(None);
        };
        if record.user_hash != *user {
            return Ok(None);
        }

        let rows = with_retry(
            "chat_messages",
            self.store_cfg.timeout_ms,
            self.store_cfg.retry,
            || self.store.chat_messages(chat_id),
        )
        .await?;

        // A warm copy may carry cache-only draft state the store knows
        // nothing about; prefer it over the bare record.
        let chat = self
            .cache
            .get_warm(user, chat_id)
            .unwrap_or_else(|| Chat::from_record(record));
        let messages: Vec<Message> = rows.into_iter().map(Message::from_record).collect();
        self.cache.put_hot(chat.clone(), messages.clone());
        Ok(Some((chat, messages)))
    }

    // ── Draft operations ─────────────────────────────────────────────────

    /// Create a chat holding only a draft. The chat lives solely in the hot
    /// cache until its first synced message. Re-creating an existing chat
    /// returns the existing one instead of colliding.
    pub async fn create_chat_with_draft(
        &self,
        user: &UserHash,
        client_chat_id: &str,
        encrypted_draft: String,
    ) -> Result<Chat> {
        let chat_id = self.resolve_chat_id(user, client_chat_id);
        let lock = self.chat_lock(&chat_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.get_chat(user, &chat_id).await? {
            return Ok(existing);
        }
        self.create_draft_only_locked(user, chat_id, encrypted_draft)
            .await
    }

    /// Caller holds the chat lock and has verified the chat does not exist.
    async fn create_draft_only_locked(
        &self,
        user: &UserHash,
        chat_id: ChatId,
        encrypted_draft: String,
    ) -> Result<Chat> {
        let key_ref = self.vault.create_key(chat_id.as_str()).await?;
        let mut chat = Chat::new(chat_id, user.clone(), key_ref);
        chat.encrypted_draft = Some(encrypted_draft);
        chat.draft_v = 1;
        debug!(chat = %chat.chat_id, "created draft-only chat");
        self.cache.put_hot(chat.clone(), Vec::new());
        Ok(chat)
    }

    /// Optimistically update a draft. Never touches the document store. A
    /// `based_on_version` of 0 against a nonexistent chat creates it.
    pub async fn update_draft(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
        based_on: u64,
        encrypted_draft: String,
    ) -> Result<(VersionCheck, Chat)> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let Some((mut chat, messages)) = self.load_hot(user, chat_id).await? else {
            if based_on == 0 {
                let chat = self
                    .create_draft_only_locked(user, chat_id.clone(), encrypted_draft)
                    .await?;
                return Ok((VersionCheck::Accepted { new_version: 1 }, chat));
            }
            return Err(ChatError::NotFound);
        };

        match arbiter::check_and_bump(chat.draft_v, based_on) {
            VersionCheck::Accepted { new_version } => {
                let now = now_ms();
                chat.encrypted_draft = Some(encrypted_draft);
                chat.draft_v = new_version;
                chat.updated_at = now;
                chat.last_edited_at = now;
                self.cache.put_hot(chat.clone(), messages);
                Ok((VersionCheck::Accepted { new_version }, chat))
            },
            rejected => Ok((rejected, chat)),
        }
    }

    /// Clear a draft: content to null, `draft_v` back to 0, and — unlike an
    /// edit — no bump of `last_edited_at`. Clearing the draft of a chat that
    /// was never persisted removes the chat entirely.
    pub async fn clear_draft(&self, user: &UserHash, chat_id: &ChatId) -> Result<Chat> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let Some((mut chat, messages)) = self.load_hot(user, chat_id).await? else {
            return Err(ChatError::NotFound);
        };

        chat.encrypted_draft = None;
        chat.draft_v = 0;
        chat.updated_at = now_ms();

        if chat.persisted {
            self.cache.put_hot(chat.clone(), messages);
        } else {
            // Draft-only chat: dropping the draft drops the chat.
            self.cache.remove(user, chat_id);
            self.vault.delete_key(&chat.vault_key_ref).await?;
        }
        Ok(chat)
    }

    // ── Title operations ─────────────────────────────────────────────────

    /// Optimistically update the title. Write-through for persisted chats.
    pub async fn update_title(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
        based_on: u64,
        encrypted_title: String,
    ) -> Result<(VersionCheck, Chat)> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let Some(mut chat) = self.get_chat(user, chat_id).await? else {
            return Err(ChatError::NotFound);
        };

        match arbiter::check_and_bump(chat.title_v, based_on) {
            VersionCheck::Accepted { new_version } => {
                let now = now_ms();
                chat.encrypted_title = Some(encrypted_title);
                chat.title_v = new_version;
                chat.updated_at = now;
                chat.last_edited_at = now;

                if chat.persisted {
                    // Store first; on failure the cache still holds the old
                    // version and the caller surfaces the error.
                    self.store_put_chat(&chat).await?;
                }
                self.refresh_cached_meta(user, &chat);
                Ok((VersionCheck::Accepted { new_version }, chat))
            },
            rejected => Ok((rejected, chat)),
        }
    }

    // ── Message operations ───────────────────────────────────────────────

    /// Append a user-authored message with status `synced`. Creates the chat
    /// if this is its first message, and promotes draft-only chats into the
    /// document store.
    pub async fn append_user_message(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
        encrypted_content: String,
    ) -> Result<(Chat, Message)> {
        self.append_terminal_message(user, chat_id, "user".into(), encrypted_content)
            .await
    }

    /// Insert or update a transient (non-durable) message in the hot cache.
    /// No version bump, no persistence; the synced transition does both.
    pub async fn upsert_transient_message(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
        message_id: &MessageId,
        sender: String,
        status: MessageStatus,
    ) -> Result<Message> {
        debug_assert!(!status.is_terminal());
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let Some((chat, mut messages)) = self.load_hot(user, chat_id).await? else {
            return Err(ChatError::NotFound);
        };

        let message = match messages.iter_mut().find(|m| &m.message_id == message_id) {
            Some(existing) => {
                existing.status = status;
                existing.clone()
            },
            None => {
                let message = Message {
                    message_id: message_id.clone(),
                    chat_id: chat_id.clone(),
                    user_hash: user.clone(),
                    sender,
                    encrypted_content: String::new(),
                    created_at: next_message_ts(&chat),
                    status,
                };
                messages.push(message.clone());
                message
            },
        };
        self.cache.put_hot(chat, messages);
        Ok(message)
    }

    /// Transition an assistant message to `synced`: set its final content,
    /// bump `messages_v`, and persist chat + message in one batch. On
    /// definitive store failure the cached copy is rolled back to `failed`.
    pub async fn finalize_assistant_message(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
        message_id: &MessageId,
        sender: String,
        encrypted_content: String,
    ) -> Result<(Chat, Message)> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let Some((mut chat, mut messages)) = self.load_hot(user, chat_id).await? else {
            return Err(ChatError::NotFound);
        };

        let (created_at, position) = match messages
            .iter()
            .position(|m| &m.message_id == message_id)
        {
            Some(idx) => (messages[idx].created_at, Some(idx)),
            None => (next_message_ts(&chat), None),
        };

        let message = Message {
            message_id: message_id.clone(),
            chat_id: chat_id.clone(),
            user_hash: user.clone(),
            sender,
            encrypted_content,
            created_at,
            status: MessageStatus::Synced,
        };

        let now = now_ms();
        chat.messages_v += 1;
        chat.last_message_at = Some(created_at);
        chat.updated_at = now;
        chat.last_edited_at = now;
        chat.persisted = true;

        let chat_record = chat.to_record();
        let msg_record = message.to_record();
        if let Err(err) = with_retry(
            "put_chat_with_message",
            self.store_cfg.timeout_ms,
            self.store_cfg.retry,
            || self.store.put_chat_with_message(&chat_record, &msg_record),
        )
        .await
        {
            // Roll the cached copy back to a terminal failure state.
            if let Some(idx) = position {
                messages[idx].status = MessageStatus::Failed;
                if let Some((old_chat, _)) = self.cache.get_hot(user, chat_id) {
                    self.cache.put_hot(old_chat, messages);
                }
            }
            return Err(err.into());
        }

        match position {
            Some(idx) => messages[idx] = message.clone(),
            None => messages.push(message.clone()),
        }
        self.cache.put_hot(chat.clone(), messages);
        Ok((chat, message))
    }

    /// Mark a transient message as failed. Cache-only; failed messages are
    /// never durable.
    pub async fn fail_message(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
        message_id: &MessageId,
    ) -> Result<()> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let Some((chat, mut messages)) = self.load_hot(user, chat_id).await? else {
            return Err(ChatError::NotFound);
        };
        let Some(message) = messages.iter_mut().find(|m| &m.message_id == message_id) else {
            return Err(ChatError::MessageNotFound);
        };
        message.status = MessageStatus::Failed;
        self.cache.put_hot(chat, messages);
        Ok(())
    }

    async fn append_terminal_message(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
        sender: String,
        encrypted_content: String,
    ) -> Result<(Chat, Message)> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let (mut chat, mut messages) = match self.load_hot(user, chat_id).await? {
            Some(entry) => entry,
            // First message of a brand-new chat.
            None => {
                if !chat_id.owned_by(user) {
                    return Err(ChatError::NotFound);
                }
                let key_ref = self.vault.create_key(chat_id.as_str()).await?;
                (Chat::new(chat_id.clone(), user.clone(), key_ref), Vec::new())
            },
        };

        let created_at = next_message_ts(&chat);
        let message = Message {
            message_id: MessageId::generate(),
            chat_id: chat_id.clone(),
            user_hash: user.clone(),
            sender,
            encrypted_content,
            created_at,
            status: MessageStatus::Synced,
        };

        let now = now_ms();
        chat.messages_v += 1;
        chat.last_message_at = Some(created_at);
        chat.updated_at = now;
        chat.last_edited_at = now;
        chat.persisted = true;

        let chat_record = chat.to_record();
        let msg_record = message.to_record();
        with_retry(
            "put_chat_with_message",
            self.store_cfg.timeout_ms,
            self.store_cfg.retry,
            || self.store.put_chat_with_message(&chat_record, &msg_record),
        )
        .await?;

        messages.push(message.clone());
        self.cache.put_hot(chat.clone(), messages);
        Ok((chat, message))
    }

    // ── Chat deletion ────────────────────────────────────────────────────

    /// Delete a chat from both cache tiers, the document store, and the
    /// secret store. Idempotent: deleting a nonexistent chat is a no-op.
    pub async fn delete_chat(&self, user: &UserHash, chat_id: &ChatId) -> Result<bool> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let Some(chat) = self.get_chat(user, chat_id).await? else {
            return Ok(false);
        };

        if chat.persisted {
            with_retry(
                "delete_chat",
                self.store_cfg.timeout_ms,
                self.store_cfg.retry,
                || self.store.delete_chat(chat_id),
            )
            .await?;
        }
        self.cache.remove(user, chat_id);
        self.vault.delete_key(&chat.vault_key_ref).await?;

        // The chat is gone; its lock entry must not outlive it or the lock
        // table grows with every chat ever created.
        drop(_guard);
        self.locks.remove(chat_id);
        Ok(true)
    }

    // ── Delta sync ───────────────────────────────────────────────────────

    /// Compute the minimal delta bringing a client current. One ranged store
    /// query per entity kind, overlaid with cache-resident chats (drafts
    /// never hit the store, so only the hot tier knows about them).
    pub async fn fetch_delta(
        &self,
        user: &UserHash,
        last_sync_ts: i64,
        known_versions: &HashMap<String, ComponentVersions>,
    ) -> Result<Delta> {
        let chat_rows = with_retry(
            "chats_updated_since",
            self.store_cfg.timeout_ms,
            self.store_cfg.retry,
            || self.store.chats_updated_since(user, last_sync_ts),
        )
        .await?;
        let message_rows = with_retry(
            "messages_updated_since",
            self.store_cfg.timeout_ms,
            self.store_cfg.retry,
            || self.store.messages_updated_since(user, last_sync_ts),
        )
        .await?;
        let all_ids = with_retry(
            "chat_ids_for_user",
            self.store_cfg.timeout_ms,
            self.store_cfg.retry,
            || self.store.chat_ids_for_user(user),
        )
        .await?;

        let mut chats: HashMap<String, Chat> = chat_rows
            .into_iter()
            .map(|r| (r.chat_id.as_str().to_string(), Chat::from_record(r)))
            .collect();

        // Cache overlay: hot entries carry draft state and may be ahead of
        // the store row; draft-only chats have no store row at all.
        let hot_chats = self.cache.peek_hot_chats(user);
        let mut existing_ids: HashSet<String> =
            all_ids.iter().map(|id| id.as_str().to_string()).collect();
        for chat in hot_chats {
            existing_ids.insert(chat.chat_id.as_str().to_string());
            if chat.updated_at > last_sync_ts {
                chats.insert(chat.chat_id.as_str().to_string(), chat);
            }
        }

        let mut chats: Vec<Chat> = chats.into_values().collect();
        chats.sort_by_key(|c| c.updated_at);
        let messages: Vec<Message> = message_rows.into_iter().map(Message::from_record).collect();

        Ok(build_delta(
            &chats,
            &messages,
            &existing_ids,
            known_versions,
            last_sync_ts,
            now_ms(),
        ))
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Hot-tier load with read-through: returns the chat and its messages,
    /// populating the hot entry from the store on miss.
    async fn load_hot(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
    ) -> Result<Option<(Chat, Vec<Message>)>> {
        self.get_chat_with_messages(user, chat_id).await
    }

    /// Push updated metadata into whichever tiers currently hold the chat.
    fn refresh_cached_meta(&self, user: &UserHash, chat: &Chat) {
        if let Some((_, messages)) = self.cache.get_hot(user, &chat.chat_id) {
            self.cache.put_hot(chat.clone(), messages);
        } else if chat.persisted {
            self.cache.put_warm(chat.clone());
        }
    }

    /// Test and diagnostics access to cache occupancy.
    pub fn cache_stats(&self, user: &UserHash) -> (usize, usize) {
        (self.cache.hot_len(user), self.cache.warm_len(user))
    }
}

/// Message timestamps are monotonic per chat; ties with the wall clock are
/// broken by advancing one past the previous message.
fn next_message_ts(chat: &Chat) -> i64 {
    let now = now_ms();
    match chat.last_message_at {
        Some(previous) if previous >= now => previous + 1,
        _ => now,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        veil_config::RetryPolicy,
        veil_store::MemoryStore,
        veil_vault::MemoryVault,
    };

    use super::*;

    fn test_repo() -> (ChatRepository, Arc<MemoryStore>, UserHash) {
        let store = Arc::new(MemoryStore::new());
        let vault = Arc::new(MemoryVault::new());
        let cache_cfg = CacheConfig {
            hot_per_user: 3,
            warm_per_user: 100,
            sliding_ttl_seconds: 1800,
        };
        let store_cfg = StoreConfig {
            path: ":memory:".into(),
            timeout_ms: 1000,
            retry: RetryPolicy {
                max_retries: 0,
                base_backoff_ms: 1,
            },
        };
        let repo = ChatRepository::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            vault,
            &cache_cfg,
            store_cfg,
        );
        (repo, store, UserHash::derive("salt", "alice"))
    }

    #[tokio::test]
    async fn draft_only_chat_never_reaches_the_store() {
        let (repo, store, user) = test_repo();
        let chat = repo
            .create_chat_with_draft(&user, "c1", "ZHJhZnQ=".into())
            .await
            .unwrap();

        assert_eq!(chat.draft_v, 1);
        assert!(!chat.persisted);
        assert!(store.get_chat(&chat.chat_id).await.unwrap().is_none());

        // Clearing the draft of a never-persisted chat removes it entirely.
        repo.clear_draft(&user, &chat.chat_id).await.unwrap();
        assert!(repo.get_chat(&user, &chat.chat_id).await.unwrap().is_none());
        assert!(store.get_chat(&chat.chat_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recreating_a_chat_returns_the_existing_one() {
        let (repo, _store, user) = test_repo();
        let first = repo
            .create_chat_with_draft(&user, "c1", "YQ==".into())
            .await
            .unwrap();
        let second = repo
            .create_chat_with_draft(&user, "c1", "Yg==".into())
            .await
            .unwrap();
        assert_eq!(first.chat_id, second.chat_id);
        assert_eq!(second.encrypted_draft, Some("YQ==".into()));
    }

    #[tokio::test]
    async fn accepted_draft_update_is_readable_at_the_new_version() {
        let (repo, _store, user) = test_repo();
        let chat = repo
            .create_chat_with_draft(&user, "c1", "djE=".into())
            .await
            .unwrap();

        let (check, _) = repo
            .update_draft(&user, &chat.chat_id, 1, "djI=".into())
            .await
            .unwrap();
        assert_eq!(check, VersionCheck::Accepted { new_version: 2 });

        let reloaded = repo.get_chat(&user, &chat.chat_id).await.unwrap().unwrap();
        assert_eq!(reloaded.draft_v, 2);
        assert_eq!(reloaded.encrypted_draft, Some("djI=".into()));
    }

    #[tokio::test]
    async fn stale_draft_update_is_rejected_with_current_version() {
        let (repo, _store, user) = test_repo();
        let chat = repo
            .create_chat_with_draft(&user, "c1", "WA==".into())
            .await
            .unwrap();

        // Device A advances to 2; device B still based on 1.
        repo.update_draft(&user, &chat.chat_id, 1, "WA==".into())
            .await
            .unwrap();
        let (check, _) = repo
            .update_draft(&user, &chat.chat_id, 1, "WQ==".into())
            .await
            .unwrap();
        assert_eq!(check, VersionCheck::Rejected { current_version: 2 });

        // The rejected write left no trace.
        let reloaded = repo.get_chat(&user, &chat.chat_id).await.unwrap().unwrap();
        assert_eq!(reloaded.encrypted_draft, Some("WA==".into()));
    }

    #[tokio::test]
    async fn title_writers_from_same_base_admit_exactly_one() {
        let (repo, _store, user) = test_repo();
        let chat_id = repo.resolve_chat_id(&user, "c1");
        repo.append_user_message(&user, &chat_id, "aGk=".into())
            .await
            .unwrap();

        let (first, _) = repo
            .update_title(&user, &chat_id, 0, "VDE=".into())
            .await
            .unwrap();
        let (second, _) = repo
            .update_title(&user, &chat_id, 0, "VDI=".into())
            .await
            .unwrap();
        assert_eq!(first, VersionCheck::Accepted { new_version: 1 });
        assert_eq!(second, VersionCheck::Rejected { current_version: 1 });
    }

    #[tokio::test]
    async fn first_message_promotes_the_chat_to_the_store() {
        let (repo, store, user) = test_repo();
        let chat = repo
            .create_chat_with_draft(&user, "c1", "ZA==".into())
            .await
            .unwrap();
        assert!(store.get_chat(&chat.chat_id).await.unwrap().is_none());

        let (updated, message) = repo
            .append_user_message(&user, &chat.chat_id, "aGVsbG8=".into())
            .await
            .unwrap();
        assert!(updated.persisted);
        assert_eq!(updated.messages_v, 1);
        assert_eq!(updated.last_message_at, Some(message.created_at));

        let record = store.get_chat(&chat.chat_id).await.unwrap().unwrap();
        assert_eq!(record.messages_v, 1);
        assert_eq!(store.chat_messages(&chat.chat_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_failure_rolls_back_title_update() {
        let (repo, store, user) = test_repo();
        let chat_id = repo.resolve_chat_id(&user, "c1");
        repo.append_user_message(&user, &chat_id, "aGk=".into())
            .await
            .unwrap();

        store.fail_next_writes(1);
        let result = repo.update_title(&user, &chat_id, 0, "VA==".into()).await;
        assert!(result.is_err());

        // Cache still serves the pre-failure version.
        let reloaded = repo.get_chat(&user, &chat_id).await.unwrap().unwrap();
        assert_eq!(reloaded.title_v, 0);
        assert_eq!(reloaded.encrypted_title, None);
    }

    #[tokio::test]
    async fn finalize_assistant_message_persists_and_bumps() {
        let (repo, store, user) = test_repo();
        let chat_id = repo.resolve_chat_id(&user, "c1");
        repo.append_user_message(&user, &chat_id, "cQ==".into())
            .await
            .unwrap();

        let message_id = MessageId::generate();
        repo.upsert_transient_message(
            &user,
            &chat_id,
            &message_id,
            "assistant/sage".into(),
            MessageStatus::Streaming,
        )
        .await
        .unwrap();
        // Streaming placeholder is cache-only.
        assert_eq!(store.chat_messages(&chat_id).await.unwrap().len(), 1);

        let (chat, message) = repo
            .finalize_assistant_message(
                &user,
                &chat_id,
                &message_id,
                "assistant/sage".into(),
                "YW5zd2Vy".into(),
            )
            .await
            .unwrap();
        assert_eq!(chat.messages_v, 2);
        assert_eq!(message.status, MessageStatus::Synced);
        assert_eq!(store.chat_messages(&chat_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_finalize_marks_the_cached_message_failed() {
        let (repo, store, user) = test_repo();
        let chat_id = repo.resolve_chat_id(&user, "c1");
        repo.append_user_message(&user, &chat_id, "cQ==".into())
            .await
            .unwrap();

        let message_id = MessageId::generate();
        repo.upsert_transient_message(
            &user,
            &chat_id,
            &message_id,
            "assistant/sage".into(),
            MessageStatus::Streaming,
        )
        .await
        .unwrap();

        store.fail_next_writes(1);
        let result = repo
            .finalize_assistant_message(
                &user,
                &chat_id,
                &message_id,
                "assistant/sage".into(),
                "YW5zd2Vy".into(),
            )
            .await;
        assert!(result.is_err());

        let (_, messages) = repo
            .get_chat_with_messages(&user, &chat_id)
            .await
            .unwrap()
            .unwrap();
        let cached = messages
            .iter()
            .find(|m| m.message_id == message_id)
            .unwrap();
        assert_eq!(cached.status, MessageStatus::Failed);
        assert_eq!(store.chat_messages(&chat_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleted_chat_shows_up_in_deletions() {
        let (repo, _store, user) = test_repo();
        let chat_id = repo.resolve_chat_id(&user, "c1");
        repo.append_user_message(&user, &chat_id, "aGk=".into())
            .await
            .unwrap();

        let known = HashMap::from([(chat_id.as_str().to_string(), ComponentVersions {
            title_v: 0,
            draft_v: 0,
            messages_v: 1,
        })]);

        assert!(repo.delete_chat(&user, &chat_id).await.unwrap());
        // Idempotent.
        assert!(!repo.delete_chat(&user, &chat_id).await.unwrap());

        let delta = repo.fetch_delta(&user, 0, &known).await.unwrap();
        assert_eq!(delta.deletions, vec![chat_id.as_str().to_string()]);
    }

    #[tokio::test]
    async fn second_sync_from_the_watermark_is_empty() {
        let (repo, _store, user) = test_repo();
        let chat_id = repo.resolve_chat_id(&user, "c1");
        let (chat, _) = repo
            .append_user_message(&user, &chat_id, "aGk=".into())
            .await
            .unwrap();

        let first = repo.fetch_delta(&user, 0, &HashMap::new()).await.unwrap();
        assert_eq!(first.updated_chats.len(), 1);

        let known = HashMap::from([(chat_id.as_str().to_string(), chat.versions())]);
        let second = repo
            .fetch_delta(&user, first.server_timestamp, &known)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn draft_only_chats_ride_the_delta_but_not_deletions() {
        let (repo, _store, user) = test_repo();
        let chat = repo
            .create_chat_with_draft(&user, "c1", "ZA==".into())
            .await
            .unwrap();

        let delta = repo.fetch_delta(&user, 0, &HashMap::new()).await.unwrap();
        assert_eq!(delta.updated_chats.len(), 1);
        assert_eq!(delta.updated_chats[0].chat_id, chat.chat_id.as_str());
        assert!(delta.updated_chats[0].draft.is_some());
        assert!(delta.deletions.is_empty());

        // A client that already knows the draft sees nothing, and the chat
        // still must not be reported deleted.
        let known = HashMap::from([(chat.chat_id.as_str().to_string(), chat.versions())]);
        let again = repo.fetch_delta(&user, 0, &known).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn hot_cache_stays_bounded() {
        let (repo, _store, user) = test_repo();
        for i in 0..6 {
            let chat_id = repo.resolve_chat_id(&user, &format!("c{i}"));
            repo.append_user_message(&user, &chat_id, "aGk=".into())
                .await
                .unwrap();
        }
        let (hot, warm) = repo.cache_stats(&user);
        assert_eq!(hot, 3);
        assert_eq!(warm, 6);
    }

    #[tokio::test]
    async fn foreign_chats_are_invisible() {
        let (repo, _store, alice) = test_repo();
        let bob = UserHash::derive("salt", "bob");
        let chat_id = repo.resolve_chat_id(&alice, "c1");
        repo.append_user_message(&alice, &chat_id, "aGk=".into())
            .await
            .unwrap();

        assert!(repo.get_chat(&bob, &chat_id).await.unwrap().is_none());
        assert!(
            repo.get_chat_with_messages(&bob, &chat_id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
