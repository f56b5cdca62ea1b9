//! Draft mutations: optimistic update and clear.

use std::sync::Arc;

use {
    veil_chat::{ChatError, VersionCheck},
    veil_common::{ChatId, UserHash},
    veil_protocol::ServerFrame,
};

use crate::{
    broadcast::broadcast_to_user,
    handlers::report_error,
    state::{GatewayState, Session},
};

/// Core of a draft update, shared by the live handler and offline replay.
/// An accepted write is broadcast to every one of the user's sessions —
/// including the originator, so all replicas converge on the same version.
pub(crate) async fn apply_draft_update(
    state: &Arc<GatewayState>,
    user: &UserHash,
    chat_id: &ChatId,
    based_on_version: u64,
    encrypted_content: String,
) -> Result<VersionCheck, ChatError> {
    let (check, chat) = state
        .repo
        .update_draft(user, chat_id, based_on_version, encrypted_content)
        .await?;

    if let VersionCheck::Accepted { new_version } = check {
        broadcast_to_user(
            &state.connections,
            user,
            &ServerFrame::DraftUpdated {
                chat_id: chat_id.as_str().into(),
                new_version,
                encrypted_draft: chat.encrypted_draft.unwrap_or_default(),
            },
            None,
        );
    }
    Ok(check)
}

/// Clear the draft and tell every session. Draft version resets to 0.
pub(crate) async fn apply_delete_draft(
    state: &Arc<GatewayState>,
    user: &UserHash,
    chat_id: &ChatId,
) -> Result<(), ChatError> {
    state.repo.clear_draft(user, chat_id).await?;
    broadcast_to_user(
        &state.connections,
        user,
        &ServerFrame::DraftCleared {
            chat_id: chat_id.as_str().into(),
            draft_v: 0,
        },
        None,
    );
    Ok(())
}

pub async fn draft_update(
    state: &Arc<GatewayState>,
    session: &Arc<Session>,
    user: &UserHash,
    chat_id: String,
    based_on_version: u64,
    encrypted_content: String,
) {
    let chat_id = state.repo.resolve_chat_id(user, &chat_id);
    match apply_draft_update(state, user, &chat_id, based_on_version, encrypted_content).await {
        Ok(VersionCheck::Accepted { .. }) => {},
        Ok(VersionCheck::Rejected { current_version }) => {
            // Conflicts are private: only the stale device needs to know.
            session.send(&ServerFrame::DraftConflict {
                chat_id: chat_id.as_str().into(),
                current_version,
            });
        },
        Err(err) => report_error(session, Some(&chat_id), &err),
    }
}

pub async fn delete_draft(
    state: &Arc<GatewayState>,
    session: &Arc<Session>,
    user: &UserHash,
    chat_id: String,
) {
    let chat_id = state.repo.resolve_chat_id(user, &chat_id);
    if let Err(err) = apply_delete_draft(state, user, &chat_id).await {
        report_error(session, Some(&chat_id), &err);
    }
}
