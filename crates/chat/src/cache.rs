//! Two-tier chat cache: hot (full chat + messages) and warm (metadata only).
//!
//! Both tiers are bounded per user and LRU within the user's bucket, with a
//! sliding TTL checked lazily on access — no sweeper task. Draft-only chats
//! exist exclusively in the hot tier; a chat present in hot is also present
//! in warm once it is persisted.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use dashmap::DashMap;

use {
    veil_common::{ChatId, UserHash},
    veil_config::CacheConfig,
};

use crate::model::{Chat, Message};

// ── Per-user bucket ──────────────────────────────────────────────────────────

struct Entry<T> {
    value: T,
    last_accessed: Instant,
}

struct Bucket<T> {
    entries: HashMap<ChatId, Entry<T>>,
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> Bucket<T> {
    /// Fetch and touch. Expired entries are dropped on the spot.
    fn get(&mut self, id: &ChatId, ttl: Duration) -> Option<&mut T> {
        let expired = self
            .entries
            .get(id)
            .is_some_and(|e| e.last_accessed.elapsed() > ttl);
        if expired {
            self.entries.remove(id);
            return None;
        }
        self.entries.get_mut(id).map(|entry| {
            entry.last_accessed = Instant::now();
            &mut entry.value
        })
    }

    /// Insert or replace, evicting the least recently used entry beyond
    /// `cap`. Replacing an existing id never evicts.
    fn insert(&mut self, id: ChatId, value: T, cap: usize) {
        if !self.entries.contains_key(&id)
            && self.entries.len() >= cap
            && let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest);
        }
        self.entries.insert(id, Entry {
            value,
            last_accessed: Instant::now(),
        });
    }

    fn remove(&mut self, id: &ChatId) -> Option<T> {
        self.entries.remove(id).map(|e| e.value)
    }

    fn live(&self, ttl: Duration) -> impl Iterator<Item = (&ChatId, &T)> {
        self.entries
            .iter()
            .filter(move |(_, e)| e.last_accessed.elapsed() <= ttl)
            .map(|(k, e)| (k, &e.value))
    }

    fn live_len(&self, ttl: Duration) -> usize {
        self.live(ttl).count()
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

struct HotEntry {
    chat: Chat,
    messages: Vec<Message>,
}

pub struct ChatCache {
    hot: DashMap<UserHash, Bucket<HotEntry>>,
    warm: DashMap<UserHash, Bucket<Chat>>,
    hot_cap: usize,
    warm_cap: usize,
    ttl: Duration,
}

impl ChatCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        Self {
            hot: DashMap::new(),
            warm: DashMap::new(),
            hot_cap: cfg.hot_per_user,
            warm_cap: cfg.warm_per_user,
            ttl: Duration::from_secs(cfg.sliding_ttl_seconds),
        }
    }

    // ── Hot tier ─────────────────────────────────────────────────────────

    pub fn get_hot(&self, user: &UserHash, chat_id: &ChatId) -> Option<(Chat, Vec<Message>)> {
        let mut bucket = self.hot.get_mut(user)?;
        bucket
            .get(chat_id, self.ttl)
            .map(|e| (e.chat.clone(), e.messages.clone()))
    }

    /// Insert a full chat into the hot tier. Persisted chats are mirrored
    /// into warm so the hot-implies-warm invariant holds.
    pub fn put_hot(&self, chat: Chat, messages: Vec<Message>) {
        if chat.persisted {
            self.put_warm(chat.clone());
        }
        let user = chat.user_hash.clone();
        let chat_id = chat.chat_id.clone();
        self.hot
            .entry(user)
            .or_default()
            .insert(chat_id, HotEntry { chat, messages }, self.hot_cap);
    }

    // ── Warm tier ────────────────────────────────────────────────────────

    pub fn get_warm(&self, user: &UserHash, chat_id: &ChatId) -> Option<Chat> {
        let mut bucket = self.warm.get_mut(user)?;
        bucket.get(chat_id, self.ttl).map(|c| c.clone())
    }

    pub fn put_warm(&self, chat: Chat) {
        let user = chat.user_hash.clone();
        let chat_id = chat.chat_id.clone();
        self.warm
            .entry(user)
            .or_default()
            .insert(chat_id, chat, self.warm_cap);
    }

    // ── Cross-tier operations ────────────────────────────────────────────

    /// Evict a chat from both tiers.
    pub fn remove(&self, user: &UserHash, chat_id: &ChatId) {
        if let Some(mut bucket) = self.hot.get_mut(user) {
            bucket.remove(chat_id);
        }
        if let Some(mut bucket) = self.warm.get_mut(user) {
            bucket.remove(chat_id);
        }
    }

    /// Unexpired hot chats for a user, without refreshing their TTL. Feeds
    /// the delta overlay for cache-only state (drafts).
    pub fn peek_hot_chats(&self, user: &UserHash) -> Vec<Chat> {
        self.hot
            .get(user)
            .map(|bucket| bucket.live(self.ttl).map(|(_, e)| e.chat.clone()).collect())
            .unwrap_or_default()
    }

    pub fn hot_len(&self, user: &UserHash) -> usize {
        self.hot
            .get(user)
            .map(|b| b.live_len(self.ttl))
            .unwrap_or(0)
    }

    pub fn warm_len(&self, user: &UserHash) -> usize {
        self.warm
            .get(user)
            .map(|b| b.live_len(self.ttl))
            .unwrap_or(0)
    }

    /// Test hook: age an entry so TTL expiry can be exercised without
    /// sleeping.
    #[cfg(test)]
    fn backdate(&self, user: &UserHash, chat_id: &ChatId, by: Duration) {
        if let Some(mut bucket) = self.hot.get_mut(user)
            && let Some(entry) = bucket.entries.get_mut(chat_id)
        {
            entry.last_accessed = Instant::now() - by;
        }
        if let Some(mut bucket) = self.warm.get_mut(user)
            && let Some(entry) = bucket.entries.get_mut(chat_id)
        {
            entry.last_accessed = Instant::now() - by;
        }
    }
}
