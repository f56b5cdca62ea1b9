//! Title mutations.

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

/// Core of a title update, shared by the live handler and offline replay.
pub(crate) async fn apply_title_update(
    state: &Arc<GatewayState>,
    user: &UserHash,
    chat_id: &ChatId,
    based_on_version: u64,
    encrypted_content: String,
) -> Result<VersionCheck, ChatError> {
    let (check, chat) = state
        .repo
        .update_title(user, chat_id, based_on_version, encrypted_content)
        .await?;

    if let VersionCheck::Accepted { new_version } = check {
        broadcast_to_user(
            &state.connections,
            user,
            &ServerFrame::TitleUpdated {
                chat_id: chat_id.as_str().into(),
                new_version,
                encrypted_title: chat.encrypted_title.unwrap_or_default(),
            },
            None,
        );
    }
    Ok(check)
}

pub async fn title_update(
    state: &Arc<GatewayState>,
    session: &Arc<Session>,
    user: &UserHash,
    chat_id: String,
    based_on_version: u64,
    encrypted_content: String,
) {
    let chat_id = state.repo.resolve_chat_id(user, &chat_id);
    match apply_title_update(state, user, &chat_id, based_on_version, encrypted_content).await {
        Ok(VersionCheck::Accepted { .. }) => {},
        Ok(VersionCheck::Rejected { current_version }) => {
            session.send(&ServerFrame::TitleConflict {
                chat_id: chat_id.as_str().into(),
                current_version,
            });
        },
        Err(err) => report_error(session, Some(&chat_id), &err),
    }
}
