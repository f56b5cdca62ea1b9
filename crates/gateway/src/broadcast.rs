//! Fan-out primitives over the session registry.
//!
//! Three delivery shapes: a single device, every device of a user, and the
//! assistant-update shape where stream chunks reach only the device whose
//! active chat matches while terminators reach everyone.

use {tracing::debug, veil_common::{ChatId, DeviceFingerprint, UserHash}, veil_protocol::ServerFrame};

use crate::state::ConnectionManager;

/// Deliver to one device. Returns false if the device has no live session
/// or its queue rejected the frame.
pub fn send_to_device(
    connections: &ConnectionManager,
    user: &UserHash,
    device: &DeviceFingerprint,
    frame: &ServerFrame,
) -> bool {
    connections
        .session(user, device)
        .map(|s| s.send(frame))
        .unwrap_or(false)
}

/// Fan a frame out across all of a user's sessions, optionally skipping one
/// device.
pub fn broadcast_to_user(
    connections: &ConnectionManager,
    user: &UserHash,
    frame: &ServerFrame,
    except: Option<&DeviceFingerprint>,
) {
    let sessions = connections.sessions_for_user(user);
    debug!(
        kind = frame.kind(),
        sessions = sessions.len(),
        "broadcasting to user"
    );
    for session in sessions {
        if except.is_some_and(|d| d == &session.device) {
            continue;
        }
        session.send(frame);
    }
}

/// The two assistant-update delivery kinds.
pub enum AiUpdate {
    /// Incremental chunk: delivered only where the chat is on screen.
    /// Chunks for other devices are dropped by design — they reconcile via
    /// the `ready` terminator or a later initial sync.
    StreamChunk(ServerFrame),
    /// Terminator: completion marker for the viewing device, sole
    /// notification for every other device.
    Ready(ServerFrame),
}

pub fn deliver_ai_update(
    connections: &ConnectionManager,
    user: &UserHash,
    chat_id: &ChatId,
    update: AiUpdate,
) {
    let sessions = connections.sessions_for_user(user);
    match update {
        AiUpdate::StreamChunk(frame) => {
            for session in sessions {
                if session.active_chat().as_ref() == Some(chat_id) {
                    session.send(&frame);
                }
            }
        },
        AiUpdate::Ready(frame) => {
            for session in sessions {
                session.send(&frame);
            }
        },
    }
}
