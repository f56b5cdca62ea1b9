//! Sync WebSocket protocol definitions.
//!
//! Protocol version 1. All communication uses JSON frames over WebSocket,
//! shaped `{ "type": "...", "payload": { ... } }`.
//!
//! Frame directions:
//! - [`ClientFrame`] — client → server (validated on decode)
//! - [`ServerFrame`] — server → client
//!
//! All chat content on the wire (titles, drafts, message bodies) is opaque
//! client-encrypted data; the server never sees plaintext.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PAYLOAD_BYTES: usize = 262_144; // 256 KB
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // 10s
pub const CHAT_CONTENT_BATCH_MAX: usize = 20;
pub const OFFLINE_SYNC_MAX_OPS: usize = 500;

// ── Error codes ──────────────────────────────────────────────────────────────

/// Stable error code strings carried in `error` frames.
pub mod error_codes {
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const AUTH_FAILED: &str = "AUTH_FAILED";
    pub const STEP_UP_REQUIRED: &str = "STEP_UP_REQUIRED";
    pub const STEP_UP_DENIED: &str = "STEP_UP_DENIED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const QUEUE_OVERFLOW: &str = "QUEUE_OVERFLOW";
    pub const HEARTBEAT_LOST: &str = "HEARTBEAT_LOST";
    pub const UPSTREAM_UNAVAILABLE: &str = "UPSTREAM_UNAVAILABLE";
    pub const ASSISTANT_FAILED: &str = "ASSISTANT_FAILED";
    pub const SESSION_REPLACED: &str = "SESSION_REPLACED";
    pub const SHUTTING_DOWN: &str = "SHUTTING_DOWN";
    pub const INTERNAL: &str = "INTERNAL";
}

/// WebSocket close codes in the application range.
pub mod close_codes {
    /// Malformed frame, unknown type, or handshake violation.
    pub const PROTOCOL: u16 = 4400;
    /// Token invalid or fingerprint rejected.
    pub const AUTH: u16 = 4401;
    /// Recoverable: reconnect and run initial sync.
    pub const RECOVERABLE: u16 = 4408;
    /// A newer session for the same (user, device) took over.
    pub const REPLACED: u16 = 4409;
}

// ── Chat components & versions ───────────────────────────────────────────────

/// One of the three independently versioned facets of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Title,
    Draft,
    Messages,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Draft => "draft",
            Self::Messages => "messages",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-component version vector for a chat, as known by one replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersions {
    #[serde(default)]
    pub title_v: u64,
    #[serde(default)]
    pub draft_v: u64,
    #[serde(default)]
    pub messages_v: u64,
}

impl ComponentVersions {
    pub fn get(&self, component: Component) -> u64 {
        match component {
            Component::Title => self.title_v,
            Component::Draft => self.draft_v,
            Component::Messages => self.messages_v,
        }
    }

    /// True if any server component is strictly newer than the client's.
    pub fn any_newer_than(&self, client: &ComponentVersions) -> bool {
        self.title_v > client.title_v
            || self.draft_v > client.draft_v
            || self.messages_v > client.messages_v
    }
}

// ── Wire payload types ───────────────────────────────────────────────────────

/// Message delivery state. Only `synced` and `failed` are terminal; only
/// `synced` is ever durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Streaming,
    WaitingForUser,
    Failed,
    Synced,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Synced | Self::Failed)
    }
}

/// A message as it crosses the wire. `encrypted_content` is an opaque
/// client-supplied string the server passes through without interpreting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: String,
    pub chat_id: String,
    pub sender: String,
    pub encrypted_content: String,
    pub created_at: i64,
    pub status: MessageStatus,
}

/// Chat metadata as it crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: String,
    pub versions: ComponentVersions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_draft: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<i64>,
    pub last_edited_at: i64,
}

/// Full chat payload: metadata plus the complete message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(flatten)]
    pub summary: ChatSummary,
    pub messages: Vec<MessagePayload>,
}

/// One versioned component inside a delta entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedBlob {
    pub version: u64,
    /// Absent when the component holds no content (e.g. a cleared draft).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<String>,
}

/// A chat entry in `delta_sync_data`. Only out-of-date components are
/// present, keeping the payload minimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatDelta {
    pub chat_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<VersionedBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<VersionedBlob>,
    /// Present when the client's message component is stale; the messages
    /// themselves ride in `updated_messages`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages_v: Option<u64>,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<i64>,
}

impl ChatDelta {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.draft.is_none() && self.messages_v.is_none()
    }
}

// ── Connect handshake ────────────────────────────────────────────────────────

/// Parameters of the initial `connect` frame. The first frame on every
/// connection must be `connect`; anything else closes the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    pub protocol: u32,
    pub token: String,
    /// Stable device fingerprint, computed client-side.
    pub device_fp: String,
    pub client: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
    pub platform: String,
}

/// Heartbeat policy announced to the client in the `connected` frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartbeatPolicy {
    pub interval_seconds: u64,
    pub miss_threshold: u32,
}

// ── Offline sync ─────────────────────────────────────────────────────────────

/// A client-originated operation captured while offline. Replayed strictly
/// in order by the offline sync handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OfflineOp {
    DraftUpdate {
        chat_id: String,
        based_on_version: u64,
        encrypted_content: String,
    },
    DeleteDraft {
        chat_id: String,
    },
    TitleUpdate {
        chat_id: String,
        based_on_version: u64,
        encrypted_content: String,
    },
    MessageReceived {
        chat_id: String,
        encrypted_content: String,
    },
    DeleteChat {
        chat_id: String,
    },
}

impl OfflineOp {
    pub fn chat_id(&self) -> &str {
        match self {
            Self::DraftUpdate { chat_id, .. }
            | Self::DeleteDraft { chat_id }
            | Self::TitleUpdate { chat_id, .. }
            | Self::MessageReceived { chat_id, .. }
            | Self::DeleteChat { chat_id } => chat_id,
        }
    }

    /// The component this op writes, for reject cascading.
    pub fn component(&self) -> Component {
        match self {
            Self::DraftUpdate { .. } | Self::DeleteDraft { .. } => Component::Draft,
            Self::TitleUpdate { .. } => Component::Title,
            Self::MessageReceived { .. } | Self::DeleteChat { .. } => Component::Messages,
        }
    }
}

/// Outcome of one replayed offline operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineOpStatus {
    Applied,
    Rejected,
    /// Skipped because an earlier op on the same (chat, component) was
    /// rejected; the client re-syncs that component instead.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineOpResult {
    pub index: usize,
    pub chat_id: String,
    pub component: Component,
    pub status: OfflineOpStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u64>,
}

// ── Client → server frames ───────────────────────────────────────────────────

/// Every frame a client may send. Decoding validates the type tag and the
/// payload shape in one step; an unrecognized tag fails the decode and the
/// router closes the session with a protocol error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    Connect(ConnectParams),
    StepUp {
        code: String,
    },
    Ping {
        #[serde(default)]
        ts: i64,
    },
    InitialSyncRequest {
        last_sync_ts: i64,
        #[serde(default)]
        known_versions: HashMap<String, ComponentVersions>,
    },
    OfflineSyncRequest {
        ops: Vec<OfflineOp>,
    },
    DraftUpdate {
        chat_id: String,
        based_on_version: u64,
        encrypted_content: String,
    },
    DeleteDraft {
        chat_id: String,
    },
    TitleUpdate {
        chat_id: String,
        based_on_version: u64,
        encrypted_content: String,
    },
    MessageReceived {
        chat_id: String,
        encrypted_content: String,
    },
    DeleteChat {
        chat_id: String,
    },
    SetActiveChat {
        chat_id: Option<String>,
    },
    GetChatMessages {
        chat_id: String,
    },
    ChatContentBatchRequest {
        chat_ids: Vec<String>,
    },
}

impl ClientFrame {
    /// Frame type tag, for logging and rate-limit classification.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::StepUp { .. } => "step_up",
            Self::Ping { .. } => "ping",
            Self::InitialSyncRequest { .. } => "initial_sync_request",
            Self::OfflineSyncRequest { .. } => "offline_sync_request",
            Self::DraftUpdate { .. } => "draft_update",
            Self::DeleteDraft { .. } => "delete_draft",
            Self::TitleUpdate { .. } => "title_update",
            Self::MessageReceived { .. } => "message_received",
            Self::DeleteChat { .. } => "delete_chat",
            Self::SetActiveChat { .. } => "set_active_chat",
            Self::GetChatMessages { .. } => "get_chat_messages",
            Self::ChatContentBatchRequest { .. } => "chat_content_batch_request",
        }
    }

    /// Handlers that hit the document store or fan out large payloads count
    /// against the per-minute expensive budget, not just the frame budget.
    pub fn is_expensive(&self) -> bool {
        matches!(
            self,
            Self::InitialSyncRequest { .. }
                | Self::OfflineSyncRequest { .. }
                | Self::GetChatMessages { .. }
                | Self::ChatContentBatchRequest { .. }
        )
    }
}

// ── Server → client frames ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

/// Every frame the server may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected {
        protocol: u32,
        server_ts: i64,
        heartbeat: HeartbeatPolicy,
    },
    StepUpRequired {},
    Pong {
        ts: i64,
    },
    ActiveChatLoad {
        chat: ChatPayload,
    },
    DeltaSyncData {
        updated_chats: Vec<ChatDelta>,
        updated_messages: Vec<MessagePayload>,
        deletions: Vec<String>,
        server_timestamp: i64,
    },
    DraftUpdated {
        chat_id: String,
        new_version: u64,
        encrypted_draft: String,
    },
    DraftConflict {
        chat_id: String,
        current_version: u64,
    },
    DraftCleared {
        chat_id: String,
        draft_v: u64,
    },
    TitleUpdated {
        chat_id: String,
        new_version: u64,
        encrypted_title: String,
    },
    TitleConflict {
        chat_id: String,
        current_version: u64,
    },
    MessageNew {
        chat_id: String,
        message: MessagePayload,
    },
    AiMessageUpdate {
        chat_id: String,
        message_id: String,
        chunk: String,
        seq: u64,
    },
    AiMessageReady {
        chat_id: String,
        message: MessagePayload,
    },
    ChatDeleted {
        chat_id: String,
    },
    OfflineSyncResult {
        results: Vec<OfflineOpResult>,
    },
    ChatMessages {
        chat_id: String,
        messages: Vec<MessagePayload>,
    },
    ChatContentBatch {
        chats: Vec<ChatPayload>,
    },
    Error(ErrorBody),
}

impl ServerFrame {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorBody {
            code: code.into(),
            message: message.into(),
            chat_id: None,
        })
    }

    pub fn chat_error(code: &str, message: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::Error(ErrorBody {
            code: code.into(),
            message: message.into(),
            chat_id: Some(chat_id.into()),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::StepUpRequired {} => "step_up_required",
            Self::Pong { .. } => "pong",
            Self::ActiveChatLoad { .. } => "active_chat_load",
            Self::DeltaSyncData { .. } => "delta_sync_data",
            Self::DraftUpdated { .. } => "draft_updated",
            Self::DraftConflict { .. } => "draft_conflict",
            Self::DraftCleared { .. } => "draft_cleared",
            Self::TitleUpdated { .. } => "title_updated",
            Self::TitleConflict { .. } => "title_conflict",
            Self::MessageNew { .. } => "message_new",
            Self::AiMessageUpdate { .. } => "ai_message_update",
            Self::AiMessageReady { .. } => "ai_message_ready",
            Self::ChatDeleted { .. } => "chat_deleted",
            Self::OfflineSyncResult { .. } => "offline_sync_result",
            Self::ChatMessages { .. } => "chat_messages",
            Self::ChatContentBatch { .. } => "chat_content_batch",
            Self::Error(_) => "error",
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_decodes_by_type_tag() {
        let raw = r#"{"type":"draft_update","payload":{"chat_id":"ab12cd34_x","based_on_version":3,"encrypted_content":"AAAA"}}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ClientFrame::DraftUpdate {
                chat_id,
                based_on_version,
                ..
            } => {
                assert_eq!(chat_id, "ab12cd34_x");
                assert_eq!(based_on_version, 3);
            },
            other => panic!("decoded wrong variant: {}", other.kind()),
        }
    }

    #[test]
    fn unknown_type_tag_fails_decode() {
        let raw = r#"{"type":"drop_all_tables","payload":{}}"#;
        assert!(serde_json::from_str::<ClientFrame>(raw).is_err());
    }

    #[test]
    fn missing_payload_field_fails_decode() {
        let raw = r#"{"type":"title_update","payload":{"chat_id":"c"}}"#;
        assert!(serde_json::from_str::<ClientFrame>(raw).is_err());
    }

    #[test]
    fn delta_entry_skips_up_to_date_components() {
        let delta = ChatDelta {
            chat_id: "ab12cd34_x".into(),
            title: None,
            draft: None,
            messages_v: Some(7),
            updated_at: 1000,
            last_message_at: Some(999),
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert!(json.get("title").is_none());
        assert!(json.get("draft").is_none());
        assert_eq!(json["messages_v"], 7);
    }

    #[test]
    fn server_frame_round_trips() {
        let frame = ServerFrame::DraftConflict {
            chat_id: "ab12cd34_x".into(),
            current_version: 2,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"draft_conflict""#));
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "draft_conflict");
    }

    #[test]
    fn version_vector_staleness() {
        let server = ComponentVersions {
            title_v: 3,
            draft_v: 0,
            messages_v: 7,
        };
        let client = ComponentVersions {
            title_v: 3,
            draft_v: 0,
            messages_v: 5,
        };
        assert!(server.any_newer_than(&client));
        assert!(!server.any_newer_than(&server.clone()));
    }
}
