//! Initial sync and offline replay.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tracing::{debug, warn};

use {
    veil_chat::{ChatError, VersionCheck},
    veil_common::UserHash,
    veil_protocol::{
        Component, ComponentVersions, OFFLINE_SYNC_MAX_OPS, OfflineOp, OfflineOpResult,
        OfflineOpStatus, ServerFrame, error_codes,
    },
};

use crate::{
    handlers::{chats, drafts, messages, report_error, titles},
    state::{GatewayState, Session},
};

/// Bring a reconnecting device current.
///
/// Order matters: the most recently opened chat is pushed first as a full
/// `active_chat_load` so the UI can render immediately, then the minimal
/// delta follows. The `server_timestamp` in the delta is the high-water mark
/// the client stores as its next `last_sync_ts`.
pub async fn initial_sync(
    state: &Arc<GatewayState>,
    session: &Arc<Session>,
    user: &UserHash,
    last_sync_ts: i64,
    known_versions: HashMap<String, ComponentVersions>,
) {
    match state.services.profile.get_last_opened_chat(user).await {
        Ok(Some(chat_id)) if chat_id.owned_by(user) => {
            match state.repo.get_chat_with_messages(user, &chat_id).await {
                Ok(Some((chat, messages))) => {
                    session.send(&ServerFrame::ActiveChatLoad {
                        chat: chat.to_payload(&messages),
                    });
                },
                Ok(None) => debug!(chat = %chat_id, "last-opened chat no longer exists"),
                Err(err) => {
                    // The delta below still serves; the anchor chat is an
                    // optimization, not a prerequisite.
                    warn!(chat = %chat_id, error = %err, "failed to load last-opened chat");
                },
            }
        },
        Ok(_) => {},
        Err(err) => warn!(error = %err, "profile lookup failed during initial sync"),
    }

    match state.repo.fetch_delta(user, last_sync_ts, &known_versions).await {
        Ok(delta) => {
            session.send(&ServerFrame::DeltaSyncData {
                updated_chats: delta.updated_chats,
                updated_messages: delta.updated_messages,
                deletions: delta.deletions,
                server_timestamp: delta.server_timestamp,
            });
        },
        Err(err) => report_error(session, None, &err),
    }
}

/// Replay operations a client captured while offline, strictly in order.
///
/// A rejected op poisons its (chat, component): every later op against that
/// pair is dropped, because the client will re-sync that component anyway.
pub async fn offline_sync(
    state: &Arc<GatewayState>,
    session: &Arc<Session>,
    user: &UserHash,
    ops: Vec<OfflineOp>,
) {
    if ops.len() > OFFLINE_SYNC_MAX_OPS {
        session.send(&ServerFrame::error(
            error_codes::PROTOCOL_ERROR,
            format!("offline batch exceeds {OFFLINE_SYNC_MAX_OPS} operations"),
        ));
        return;
    }

    let mut poisoned: HashSet<(String, Component)> = HashSet::new();
    let mut results = Vec::with_capacity(ops.len());

    for (index, op) in ops.into_iter().enumerate() {
        let chat_id = state.repo.resolve_chat_id(user, op.chat_id());
        let component = op.component();
        let key = (chat_id.as_str().to_string(), component);

        if poisoned.contains(&key) {
            results.push(OfflineOpResult {
                index,
                chat_id: chat_id.as_str().into(),
                component,
                status: OfflineOpStatus::Dropped,
                current_version: None,
            });
            continue;
        }

        let outcome = match op {
            OfflineOp::DraftUpdate {
                based_on_version,
                encrypted_content,
                ..
            } => {
                drafts::apply_draft_update(state, user, &chat_id, based_on_version, encrypted_content)
                    .await
                    .map(Some)
            },
            OfflineOp::DeleteDraft { .. } => drafts::apply_delete_draft(state, user, &chat_id)
                .await
                .map(|()| None),
            OfflineOp::TitleUpdate {
                based_on_version,
                encrypted_content,
                ..
            } => {
                titles::apply_title_update(state, user, &chat_id, based_on_version, encrypted_content)
                    .await
                    .map(Some)
            },
            OfflineOp::MessageReceived {
                encrypted_content, ..
            } => messages::apply_message_received(state, user, &chat_id, encrypted_content)
                .await
                .map(|_| None),
            OfflineOp::DeleteChat { .. } => chats::apply_delete_chat(state, user, &chat_id)
                .await
                .map(|()| None),
        };

        let result = match outcome {
            Ok(None) | Ok(Some(VersionCheck::Accepted { .. })) => OfflineOpResult {
                index,
                chat_id: chat_id.as_str().into(),
                component,
                status: OfflineOpStatus::Applied,
                current_version: None,
            },
            Ok(Some(VersionCheck::Rejected { current_version })) => {
                poisoned.insert(key);
                OfflineOpResult {
                    index,
                    chat_id: chat_id.as_str().into(),
                    component,
                    status: OfflineOpStatus::Rejected,
                    current_version: Some(current_version),
                }
            },
            Err(ChatError::NotFound) => {
                poisoned.insert(key);
                OfflineOpResult {
                    index,
                    chat_id: chat_id.as_str().into(),
                    component,
                    status: OfflineOpStatus::Rejected,
                    current_version: None,
                }
            },
            Err(err) => {
                // Upstream failure: stop replaying, report what happened so
                // far, and let the client retry the remainder later.
                report_error(session, Some(&chat_id), &err);
                break;
            },
        };
        results.push(result);
    }

    session.send(&ServerFrame::OfflineSyncResult { results });
}
