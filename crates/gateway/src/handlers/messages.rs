//! Message ingest and chat content reads.

use std::sync::Arc;

use tracing::warn;

use {
    veil_chat::{Chat, ChatError, Message},
    veil_common::{ChatId, UserHash},
    veil_protocol::{CHAT_CONTENT_BATCH_MAX, ServerFrame, error_codes},
    veil_service_traits::PreprocessJob,
};

use crate::{
    broadcast::broadcast_to_user,
    handlers::report_error,
    state::{GatewayState, Session},
};

/// Core of a user message: persist with status `synced`, broadcast
/// `message_new` to every session, hand the chat to the assistant pipeline.
/// The assistant's answer comes back through the worker ingress, not here.
pub(crate) async fn apply_message_received(
    state: &Arc<GatewayState>,
    user: &UserHash,
    chat_id: &ChatId,
    encrypted_content: String,
) -> Result<(Chat, Message), ChatError> {
    let (chat, message) = state
        .repo
        .append_user_message(user, chat_id, encrypted_content)
        .await?;

    broadcast_to_user(
        &state.connections,
        user,
        &ServerFrame::MessageNew {
            chat_id: chat_id.as_str().into(),
            message: message.to_payload(),
        },
        None,
    );

    if let Err(err) = state
        .services
        .worker_queue
        .enqueue(PreprocessJob {
            chat_id: chat_id.clone(),
            user_hash: user.clone(),
            message_id: message.message_id.clone(),
        })
        .await
    {
        // The message is durable either way; the assistant just won't answer.
        warn!(chat = %chat_id, error = %err, "failed to enqueue preprocess job");
    }
    Ok((chat, message))
}

pub async fn message_received(
    state: &Arc<GatewayState>,
    session: &Arc<Session>,
    user: &UserHash,
    chat_id: String,
    encrypted_content: String,
) {
    let chat_id = state.repo.resolve_chat_id(user, &chat_id);
    if let Err(err) = apply_message_received(state, user, &chat_id, encrypted_content).await {
        report_error(session, Some(&chat_id), &err);
    }
}

/// Full message list for one chat, replied privately to the requesting
/// session. This is the path taken when a device opens a chat outside the
/// initial high-priority set.
pub async fn get_chat_messages(
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

    match state.repo.get_chat_with_messages(user, &chat_id).await {
        Ok(Some((_, messages))) => {
            session.send(&ServerFrame::ChatMessages {
                chat_id: chat_id.as_str().into(),
                messages: messages.iter().map(Message::to_payload).collect(),
            });

            // Opening a chat is the one explicit action that may update the
            // durable last-opened anchor, and only when configured to.
            if state.config.sync.persist_active_chat_as_last_opened
                && let Err(err) = state
                    .services
                    .profile
                    .set_last_opened_chat(user, &chat_id)
                    .await
            {
                warn!(chat = %chat_id, error = %err, "failed to persist last-opened chat");
            }
        },
        Ok(None) => report_error(session, Some(&chat_id), &ChatError::NotFound),
        Err(err) => report_error(session, Some(&chat_id), &err),
    }
}

/// Batched fetch-through for the client's progressive loading phases.
pub async fn chat_content_batch(
    state: &Arc<GatewayState>,
    session: &Arc<Session>,
    user: &UserHash,
    chat_ids: Vec<String>,
) {
    if chat_ids.len() > CHAT_CONTENT_BATCH_MAX {
        session.send(&ServerFrame::error(
            error_codes::PROTOCOL_ERROR,
            format!("batch exceeds {CHAT_CONTENT_BATCH_MAX} chats"),
        ));
        return;
    }

    let mut chats = Vec::with_capacity(chat_ids.len());
    for raw in chat_ids {
        let chat_id = state.repo.resolve_chat_id(user, &raw);
        if !chat_id.owned_by(user) {
            continue;
        }
        match state.repo.get_chat_with_messages(user, &chat_id).await {
            Ok(Some((chat, messages))) => chats.push(chat.to_payload(&messages)),
            Ok(None) => {},
            Err(err) => {
                report_error(session, Some(&chat_id), &err);
                return;
            },
        }
    }
    session.send(&ServerFrame::ChatContentBatch { chats });
}
