//! Worker ingress: the path by which assistant workers feed responses back
//! into the core. The mirror image of the worker queue — jobs go out through
//! [`veil_service_traits::WorkerQueue`], chunks and terminators come back
//! here.

use std::sync::Arc;

use tracing::{debug, warn};

use {
    veil_common::{ChatId, MessageId, UserHash},
    veil_protocol::{MessageStatus, ServerFrame, error_codes},
};

use crate::{
    broadcast::{AiUpdate, broadcast_to_user, deliver_ai_update},
    state::GatewayState,
};

/// Handle given to the assistant pipeline. Clone-cheap.
#[derive(Clone)]
pub struct WorkerIngress {
    state: Arc<GatewayState>,
}

impl WorkerIngress {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    /// One streamed paragraph. Reaches only the device(s) currently viewing
    /// the chat; chunks for everyone else are dropped by design.
    pub async fn stream_chunk(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
        message_id: &MessageId,
        sender: &str,
        chunk: String,
        seq: u64,
    ) {
        if seq == 0 {
            // First chunk: materialize the streaming placeholder in the hot
            // cache so a mid-stream `get_chat_messages` sees it.
            if let Err(err) = self
                .state
                .repo
                .upsert_transient_message(
                    user,
                    chat_id,
                    message_id,
                    sender.to_string(),
                    MessageStatus::Streaming,
                )
                .await
            {
                debug!(chat = %chat_id, error = %err, "dropping stream for missing chat");
                return;
            }
        }

        deliver_ai_update(
            &self.state.connections,
            user,
            chat_id,
            AiUpdate::StreamChunk(ServerFrame::AiMessageUpdate {
                chat_id: chat_id.as_str().into(),
                message_id: message_id.as_str().into(),
                chunk,
                seq,
            }),
        );
    }

    /// The assistant paused for user input (tool-gated flows). Cache-only
    /// state; never persisted.
    pub async fn message_waiting(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
        message_id: &MessageId,
        sender: &str,
    ) {
        if let Err(err) = self
            .state
            .repo
            .upsert_transient_message(
                user,
                chat_id,
                message_id,
                sender.to_string(),
                MessageStatus::WaitingForUser,
            )
            .await
        {
            debug!(chat = %chat_id, error = %err, "cannot mark message waiting");
        }
    }

    /// Terminal: persist the completed response, then fan out the `ready`
    /// terminator — completion marker on the viewing device, sole
    /// notification everywhere else.
    pub async fn message_ready(
        &self,
        user: &UserHash,
        chat_id: &ChatId,
        message_id: &MessageId,
        sender: &str,
        encrypted_content: String,
    ) {
        match self
            .state
            .repo
            .finalize_assistant_message(
                user,
                chat_id,
                message_id,
                sender.to_string(),
                encrypted_content,
            )
            .await
        {
            Ok((_, message)) => {
                deliver_ai_update(
                    &self.state.connections,
                    user,
                    chat_id,
                    AiUpdate::Ready(ServerFrame::AiMessageReady {
                        chat_id: chat_id.as_str().into(),
                        message: message.to_payload(),
                    }),
                );
            },
            Err(err) => {
                warn!(chat = %chat_id, message = %message_id, error = %err, "failed to persist assistant message");
                broadcast_to_user(
                    &self.state.connections,
                    user,
                    &ServerFrame::chat_error(
                        error_codes::UPSTREAM_UNAVAILABLE,
                        "assistant response could not be saved",
                        chat_id.as_str(),
                    ),
                    None,
                );
            },
        }
    }

    /// The assistant gave up. The placeholder flips to `failed` (cache-only,
    /// never durable) and every device is told.
    pub async fn message_failed(&self, user: &UserHash, chat_id: &ChatId, message_id: &MessageId) {
        if let Err(err) = self.state.repo.fail_message(user, chat_id, message_id).await {
            debug!(chat = %chat_id, error = %err, "cannot mark message failed");
        }
        broadcast_to_user(
            &self.state.connections,
            user,
            &ServerFrame::chat_error(
                error_codes::ASSISTANT_FAILED,
                "assistant failed to respond",
                chat_id.as_str(),
            ),
            None,
        );
    }
}
