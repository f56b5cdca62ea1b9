//! Per-frame business logic. Every handler receives the standard bundle
//! (state, session, user, device) plus its typed payload, mutates state only
//! through the repository, and fans results out through the broadcast
//! primitives.
//!
//! Handlers never close the session; protocol and auth violations are dealt
//! with in the connection loop before a frame reaches a handler.

pub mod chats;
pub mod drafts;
pub mod messages;
pub mod sync;
pub mod titles;

use {
    veil_chat::ChatError,
    veil_common::ChatId,
    veil_protocol::{ServerFrame, error_codes},
};

use crate::state::Session;

/// Map a repository failure onto the private error frame the originator
/// sees. Not-found and not-owned are indistinguishable on purpose.
pub(crate) fn report_error(session: &Session, chat_id: Option<&ChatId>, err: &ChatError) {
    let (code, message) = match err {
        ChatError::NotFound | ChatError::MessageNotFound => {
            (error_codes::NOT_FOUND, "not found or not permitted".to_string())
        },
        ChatError::Store(e) => (error_codes::UPSTREAM_UNAVAILABLE, e.to_string()),
        ChatError::Vault(e) => (error_codes::UPSTREAM_UNAVAILABLE, e.to_string()),
        ChatError::Invalid { message } => (error_codes::PROTOCOL_ERROR, message.clone()),
    };
    let frame = match chat_id {
        Some(chat_id) => ServerFrame::chat_error(code, message, chat_id.as_str()),
        None => ServerFrame::error(code, message),
    };
    session.send(&frame);
}
