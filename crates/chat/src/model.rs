//! Domain model for chats and messages.
//!
//! A [`Chat`] here is the metadata shape shared by both cache tiers; the hot
//! tier pairs it with the message list. Conversions to the persisted records
//! drop the draft fields — drafts are cache-resident only.

use {
    veil_common::{ChatId, MessageId, UserHash, now_ms},
    veil_protocol::{ChatPayload, ChatSummary, ComponentVersions, MessagePayload, MessageStatus},
    veil_store::{ChatRecord, MessageRecord},
    veil_vault::VaultKeyRef,
};

// ── Chat ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub chat_id: ChatId,
    pub user_hash: UserHash,
    pub vault_key_ref: VaultKeyRef,
    pub encrypted_title: Option<String>,
    pub encrypted_draft: Option<String>,
    pub title_v: u64,
    pub draft_v: u64,
    pub messages_v: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_message_at: Option<i64>,
    pub last_edited_at: i64,
    /// True once the chat has a row in the document store, i.e. once its
    /// first message reached `synced`.
    pub persisted: bool,
}

impl Chat {
    /// A fresh, unpersisted chat. Versions start at 0.
    pub fn new(chat_id: ChatId, user_hash: UserHash, vault_key_ref: VaultKeyRef) -> Self {
        let now = now_ms();
        Self {
            chat_id,
            user_hash,
            vault_key_ref,
            encrypted_title: None,
            encrypted_draft: None,
            title_v: 0,
            draft_v: 0,
            messages_v: 0,
            created_at: now,
            updated_at: now,
            last_message_at: None,
            last_edited_at: now,
            persisted: false,
        }
    }

    pub fn versions(&self) -> ComponentVersions {
        ComponentVersions {
            title_v: self.title_v,
            draft_v: self.draft_v,
            messages_v: self.messages_v,
        }
    }

    pub fn to_summary(&self) -> ChatSummary {
        ChatSummary {
            chat_id: self.chat_id.as_str().to_string(),
            versions: self.versions(),
            encrypted_title: self.encrypted_title.clone(),
            encrypted_draft: self.encrypted_draft.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_message_at: self.last_message_at,
            last_edited_at: self.last_edited_at,
        }
    }

    pub fn to_payload(&self, messages: &[Message]) -> ChatPayload {
        ChatPayload {
            summary: self.to_summary(),
            messages: messages.iter().map(Message::to_payload).collect(),
        }
    }

    /// The persisted shape. Draft content and `draft_v` do not survive the
    /// conversion.
    pub fn to_record(&self) -> ChatRecord {
        ChatRecord {
            chat_id: self.chat_id.clone(),
            user_hash: self.user_hash.clone(),
            vault_key_ref: self.vault_key_ref.as_str().to_string(),
            encrypted_title: self.encrypted_title.clone(),
            title_v: self.title_v,
            messages_v: self.messages_v,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_message_at: self.last_message_at,
            last_edited_at: self.last_edited_at,
        }
    }

    pub fn from_record(record: ChatRecord) -> Self {
        Self {
            chat_id: record.chat_id,
            user_hash: record.user_hash,
            vault_key_ref: VaultKeyRef::from_string(record.vault_key_ref),
            encrypted_title: record.encrypted_title,
            encrypted_draft: None,
            title_v: record.title_v,
            draft_v: 0,
            messages_v: record.messages_v,
            created_at: record.created_at,
            updated_at: record.updated_at,
            last_message_at: record.last_message_at,
            last_edited_at: record.last_edited_at,
            persisted: true,
        }
    }
}

// ── Message ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub user_hash: UserHash,
    pub sender: String,
    pub encrypted_content: String,
    pub created_at: i64,
    pub status: MessageStatus,
}

impl Message {
    pub fn to_payload(&self) -> MessagePayload {
        MessagePayload {
            message_id: self.message_id.as_str().to_string(),
            chat_id: self.chat_id.as_str().to_string(),
            sender: self.sender.clone(),
            encrypted_content: self.encrypted_content.clone(),
            created_at: self.created_at,
            status: self.status,
        }
    }

    /// The persisted shape. Callable only for synced messages; transient
    /// states never reach the store.
    pub fn to_record(&self) -> MessageRecord {
        debug_assert_eq!(self.status, MessageStatus::Synced);
        MessageRecord {
            message_id: self.message_id.clone(),
            chat_id: self.chat_id.clone(),
            user_hash: self.user_hash.clone(),
            sender: self.sender.clone(),
            encrypted_content: self.encrypted_content.clone(),
            created_at: self.created_at,
            updated_at: now_ms(),
        }
    }

    pub fn from_record(record: MessageRecord) -> Self {
        Self {
            message_id: record.message_id,
            chat_id: record.chat_id,
            user_hash: record.user_hash,
            sender: record.sender,
            encrypted_content: record.encrypted_content,
            created_at: record.created_at,
            status: MessageStatus::Synced,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_chat_starts_at_version_zero() {
        let owner = UserHash::derive("s", "alice");
        let chat = Chat::new(
            ChatId::from_parts(&owner, "c1"),
            owner,
            VaultKeyRef::generate(),
        );
        assert_eq!(chat.versions(), ComponentVersions::default());
        assert!(!chat.persisted);
        assert!(chat.updated_at >= chat.created_at);
    }

    #[test]
    fn record_round_trip_drops_draft() {
        let owner = UserHash::derive("s", "alice");
        let mut chat = Chat::new(
            ChatId::from_parts(&owner, "c1"),
            owner,
            VaultKeyRef::generate(),
        );
        chat.encrypted_draft = Some("ZHJhZnQ=".into());
        chat.draft_v = 2;
        chat.messages_v = 1;

        let restored = Chat::from_record(chat.to_record());
        assert_eq!(restored.encrypted_draft, None);
        assert_eq!(restored.draft_v, 0);
        assert_eq!(restored.messages_v, 1);
        assert!(restored.persisted);
    }
}
