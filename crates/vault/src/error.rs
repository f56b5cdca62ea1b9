//! Secret store error types.

/// Errors produced by secret store operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// No key exists for the given reference.
    #[error("unknown key reference")]
    UnknownRef,

    /// A key already exists for this chat.
    #[error("key already provisioned")]
    AlreadyProvisioned,

    /// The backing store failed.
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;
