//! Chat deletion and per-device active chat tracking.

use std::sync::Arc;

use {
    veil_chat::ChatError,
    veil_common::{ChatId, DeviceFingerprint, UserHash},
    veil_protocol::ServerFrame,
};

use crate::{
    broadcast::broadcast_to_user,
    handlers::report_error,
    state::{GatewayState, Session},
};

/// Core of a chat deletion, shared by the live handler and offline replay.
/// Idempotent; the broadcast fires only when something was actually removed.
pub(crate) async fn apply_delete_chat(
    state: &Arc<GatewayState>,
    user: &UserHash,
    chat_id: &ChatId,
) -> Result<(), ChatError> {
    if state.repo.delete_chat(user, chat_id).await? {
        broadcast_to_user(
            &state.connections,
            user,
            &ServerFrame::ChatDeleted {
                chat_id: chat_id.as_str().into(),
            },
            None,
        );
    }
    Ok(())
}

pub async fn delete_chat(
    state: &Arc<GatewayState>,
    session: &Arc<Session>,
    user: &UserHash,
    chat_id: String,
) {
    let chat_id = state.repo.resolve_chat_id(user, &chat_id);
    if !chat_id.owned_by(user) {
        report_error(session, Some(&chat_id), &ChatError::NotFound);
        return;
    }
    if let Err(err) = apply_delete_chat(state, user, &chat_id).await {
        report_error(session, Some(&chat_id), &err);
    }
}

/// Purely per-device: records which chat this session is viewing, which
/// gates stream-chunk delivery. Idempotent, no persistence, no reply.
pub async fn set_active_chat(
    state: &Arc<GatewayState>,
    session: &Arc<Session>,
    user: &UserHash,
    _device: &DeviceFingerprint,
    chat_id: Option<String>,
) {
    let resolved = chat_id.map(|raw| state.repo.resolve_chat_id(user, &raw));
    session.set_active_chat(resolved);
}
