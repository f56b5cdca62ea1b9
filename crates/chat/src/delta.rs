//! Delta computation for initial sync.
//!
//! Given the server-side view of a user's chats (store rows overlaid with
//! cache-resident state) and the client's `{last_sync_ts, known_versions}`,
//! produce the minimal payload that brings the client current: per chat only
//! the components whose server version is strictly newer, messages only for
//! chats whose message component is stale, plus deletions.

use std::collections::{HashMap, HashSet};

use veil_protocol::{ChatDelta, ComponentVersions, MessagePayload, VersionedBlob};

use crate::model::{Chat, Message};

/// The computed delta, one-to-one with the `delta_sync_data` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub updated_chats: Vec<ChatDelta>,
    pub updated_messages: Vec<MessagePayload>,
    pub deletions: Vec<String>,
    pub server_timestamp: i64,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.updated_chats.is_empty()
            && self.updated_messages.is_empty()
            && self.deletions.is_empty()
    }
}

pub fn build_delta(
    chats: &[Chat],
    messages: &[Message],
    existing_ids: &HashSet<String>,
    known_versions: &HashMap<String, ComponentVersions>,
    last_sync_ts: i64,
    server_timestamp: i64,
) -> Delta {
    let mut updated_chats = Vec::new();
    let mut stale_message_chats: HashSet<&str> = HashSet::new();

    for chat in chats {
        let client = known_versions
            .get(chat.chat_id.as_str())
            .copied()
            .unwrap_or_default();

        let mut entry = ChatDelta {
            chat_id: chat.chat_id.as_str().to_string(),
            title: None,
            draft: None,
            messages_v: None,
            updated_at: chat.updated_at,
            last_message_at: chat.last_message_at,
        };

        if chat.title_v > client.title_v {
            entry.title = Some(VersionedBlob {
                version: chat.title_v,
                encrypted: chat.encrypted_title.clone(),
            });
        }
        if chat.draft_v > client.draft_v {
            entry.draft = Some(VersionedBlob {
                version: chat.draft_v,
                encrypted: chat.encrypted_draft.clone(),
            });
        }
        if chat.messages_v > client.messages_v {
            entry.messages_v = Some(chat.messages_v);
            stale_message_chats.insert(chat.chat_id.as_str());
        }

        if !entry.is_empty() {
            updated_chats.push(entry);
        }
    }

    let updated_messages = messages
        .iter()
        .filter(|m| {
            m.created_at > last_sync_ts && stale_message_chats.contains(m.chat_id.as_str())
        })
        .map(Message::to_payload)
        .collect();

    let mut deletions: Vec<String> = known_versions
        .keys()
        .filter(|id| !existing_ids.contains(*id))
        .cloned()
        .collect();
    deletions.sort();

    Delta {
        updated_chats,
        updated_messages,
        deletions,
        server_timestamp,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        veil_common::{ChatId, MessageId, UserHash},
        veil_protocol::MessageStatus,
        veil_vault::VaultKeyRef,
    };

    use super::*;

    fn chat(owner: &UserHash, client_id: &str, title_v: u64, draft_v: u64, messages_v: u64) -> Chat {
        let mut c = Chat::new(
            ChatId::from_parts(owner, client_id),
            owner.clone(),
            VaultKeyRef::generate(),
        );
        c.title_v = title_v;
        c.draft_v = draft_v;
        c.messages_v = messages_v;
        if title_v > 0 {
            c.encrypted_title = Some("dA==".into());
        }
        if draft_v > 0 {
            c.encrypted_draft = Some("ZA==".into());
        }
        c
    }

    fn message(chat: &Chat, id: &str, created_at: i64) -> Message {
        Message {
            message_id: MessageId::from_string(id),
            chat_id: chat.chat_id.clone(),
            user_hash: chat.user_hash.clone(),
            sender: "user".into(),
            encrypted_content: "bQ==".into(),
            created_at,
            status: MessageStatus::Synced,
        }
    }

    fn ids(chats: &[Chat]) -> HashSet<String> {
        chats.iter().map(|c| c.chat_id.as_str().to_string()).collect()
    }

    #[test]
    fn includes_only_stale_components() {
        // Server: chat_1 {3,0,7}, chat_2 {1,2,0}. Client knows chat_1 {3,0,5}
        // and chat_2 {1,2,0}: only chat_1's messages are stale.
        let owner = UserHash::derive("s", "alice");
        let chat_1 = chat(&owner, "chat_1", 3, 0, 7);
        let chat_2 = chat(&owner, "chat_2", 1, 2, 0);
        let chats = vec![chat_1.clone(), chat_2.clone()];

        let known = HashMap::from([
            (chat_1.chat_id.as_str().to_string(), ComponentVersions {
                title_v: 3,
                draft_v: 0,
                messages_v: 5,
            }),
            (chat_2.chat_id.as_str().to_string(), ComponentVersions {
                title_v: 1,
                draft_v: 2,
                messages_v: 0,
            }),
        ]);

        let messages = vec![message(&chat_1, "m6", 500), message(&chat_1, "m7", 600)];
        let delta = build_delta(&chats, &messages, &ids(&chats), &known, 100, 1000);

        assert_eq!(delta.updated_chats.len(), 1);
        let entry = &delta.updated_chats[0];
        assert_eq!(entry.chat_id, chat_1.chat_id.as_str());
        assert!(entry.title.is_none());
        assert!(entry.draft.is_none());
        assert_eq!(entry.messages_v, Some(7));
        assert_eq!(delta.updated_messages.len(), 2);
        assert!(delta.deletions.is_empty());
    }

    #[test]
    fn unknown_chat_is_sent_in_full() {
        let owner = UserHash::derive("s", "alice");
        let c = chat(&owner, "fresh", 1, 1, 2);
        let chats = vec![c.clone()];
        let delta = build_delta(&chats, &[], &ids(&chats), &HashMap::new(), 0, 1000);

        assert_eq!(delta.updated_chats.len(), 1);
        let entry = &delta.updated_chats[0];
        assert!(entry.title.is_some());
        assert!(entry.draft.is_some());
        assert_eq!(entry.messages_v, Some(2));
    }

    #[test]
    fn vanished_chats_appear_in_deletions() {
        let owner = UserHash::derive("s", "alice");
        let gone = ChatId::from_parts(&owner, "gone");
        let known = HashMap::from([(gone.as_str().to_string(), ComponentVersions::default())]);

        let delta = build_delta(&[], &[], &HashSet::new(), &known, 0, 1000);
        assert_eq!(delta.deletions, vec![gone.as_str().to_string()]);
    }

    #[test]
    fn identical_versions_yield_empty_delta() {
        let owner = UserHash::derive("s", "alice");
        let c = chat(&owner, "c1", 2, 0, 4);
        let known = HashMap::from([(c.chat_id.as_str().to_string(), c.versions())]);
        let chats = vec![c];

        let delta = build_delta(&chats, &[], &ids(&chats), &known, 0, 1000);
        assert!(delta.is_empty());
    }

    #[test]
    fn messages_for_up_to_date_chats_are_skipped() {
        let owner = UserHash::derive("s", "alice");
        let c = chat(&owner, "c1", 0, 0, 4);
        let known = HashMap::from([(c.chat_id.as_str().to_string(), c.versions())]);
        let messages = vec![message(&c, "m1", 900)];
        let chats = vec![c];

        let delta = build_delta(&chats, &messages, &ids(&chats), &known, 0, 1000);
        assert!(delta.updated_messages.is_empty());
    }

    #[test]
    fn old_messages_are_not_resent() {
        let owner = UserHash::derive("s", "alice");
        let c = chat(&owner, "c1", 0, 0, 4);
        let messages = vec![message(&c, "m_old", 50), message(&c, "m_new", 500)];
        let chats = vec![c];

        let delta = build_delta(&chats, &messages, &ids(&chats), &HashMap::new(), 100, 1000);
        assert_eq!(delta.updated_messages.len(), 1);
        assert_eq!(delta.updated_messages[0].message_id, "m_new");
    }
}
