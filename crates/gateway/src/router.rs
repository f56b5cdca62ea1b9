//! Frame dispatch: one decoded [`ClientFrame`] in, the matching handler out.
//!
//! Handshake-phase frames (`connect`, `step_up`) and `ping` never reach the
//! router — the connection loop consumes them. Everything else lands here
//! with an authenticated (user, device) pair.

use std::sync::Arc;

use tracing::debug;

use veil_protocol::ClientFrame;

use crate::{
    handlers,
    state::{GatewayState, Session},
};

pub async fn dispatch(state: &Arc<GatewayState>, session: &Arc<Session>, frame: ClientFrame) {
    let user = session.user.clone();
    let device = session.device.clone();
    debug!(conn = %session.conn_id, kind = frame.kind(), "dispatching frame");

    match frame {
        ClientFrame::InitialSyncRequest {
            last_sync_ts,
            known_versions,
        } => {
            handlers::sync::initial_sync(state, session, &user, last_sync_ts, known_versions).await;
        },
        ClientFrame::OfflineSyncRequest { ops } => {
            handlers::sync::offline_sync(state, session, &user, ops).await;
        },
        ClientFrame::DraftUpdate {
            chat_id,
            based_on_version,
            encrypted_content,
        } => {
            handlers::drafts::draft_update(
                state,
                session,
                &user,
                chat_id,
                based_on_version,
                encrypted_content,
            )
            .await;
        },
        ClientFrame::DeleteDraft { chat_id } => {
            handlers::drafts::delete_draft(state, session, &user, chat_id).await;
        },
        ClientFrame::TitleUpdate {
            chat_id,
            based_on_version,
            encrypted_content,
        } => {
            handlers::titles::title_update(
                state,
                session,
                &user,
                chat_id,
                based_on_version,
                encrypted_content,
            )
            .await;
        },
        ClientFrame::MessageReceived {
            chat_id,
            encrypted_content,
        } => {
            handlers::messages::message_received(state, session, &user, chat_id, encrypted_content)
                .await;
        },
        ClientFrame::DeleteChat { chat_id } => {
            handlers::chats::delete_chat(state, session, &user, chat_id).await;
        },
        ClientFrame::SetActiveChat { chat_id } => {
            handlers::chats::set_active_chat(state, session, &user, &device, chat_id).await;
        },
        ClientFrame::GetChatMessages { chat_id } => {
            handlers::messages::get_chat_messages(state, session, &user, chat_id).await;
        },
        ClientFrame::ChatContentBatchRequest { chat_ids } => {
            handlers::messages::chat_content_batch(state, session, &user, chat_ids).await;
        },
        // Consumed by the connection loop before dispatch.
        ClientFrame::Connect(_) | ClientFrame::StepUp { .. } | ClientFrame::Ping { .. } => {
            debug!(conn = %session.conn_id, "handshake frame after connect, ignoring");
        },
    }
}
