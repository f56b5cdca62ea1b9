//! Identifier newtypes.
//!
//! The server is zero-knowledge with respect to user identity: chats are
//! keyed by a salted hash of the user id, and the plaintext id is never
//! stored beside it. Chat ids are derived deterministically so a client can
//! create a chat offline and the server maps it to the same id on every
//! replay.

use {
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
};

// ── User hash ────────────────────────────────────────────────────────────────

/// Salted SHA-256 of a user id, lowercase hex. The only form in which the
/// server ever persists user identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserHash(String);

impl UserHash {
    pub fn derive(salt: &str, user_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(user_id.as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    /// Wrap an already-derived hash (e.g. read back from the store).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// First 8 hex chars, used as the owner prefix of every chat id.
    pub fn prefix8(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Chat id ──────────────────────────────────────────────────────────────────

/// Chat identifier of the form `{8hex}_{client-chosen id}`. The prefix binds
/// the chat to its owner's hash, so ids cannot collide across users and an
/// owner check is a string-prefix comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn from_parts(owner: &UserHash, client_chat_id: &str) -> Self {
        Self(format!("{}_{client_chat_id}", owner.prefix8()))
    }

    /// Resolve a client-supplied id for `owner`: a full id carrying the
    /// owner's prefix passes through, anything else is treated as the
    /// client-chosen part and prefixed. Re-resolving an already-resolved id
    /// is a no-op, which makes chat creation idempotent under replay.
    pub fn resolve(owner: &UserHash, raw: &str) -> Self {
        let prefix = owner.prefix8();
        match raw.split_once('_') {
            Some((head, _)) if head == prefix => Self(raw.to_string()),
            _ => Self::from_parts(owner, raw),
        }
    }

    /// True if this chat id carries `owner`'s prefix.
    pub fn owned_by(&self, owner: &UserHash) -> bool {
        self.0
            .split_once('_')
            .map(|(head, _)| head == owner.prefix8())
            .unwrap_or(false)
    }

    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Device fingerprint ───────────────────────────────────────────────────────

/// Stable per-device fingerprint computed client-side. Opaque to the server;
/// only compared for equality against the user's known set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Message id ───────────────────────────────────────────────────────────────

/// Server-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
