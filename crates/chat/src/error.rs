use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The chat does not exist (or the caller may not see it — the two are
    /// indistinguishable on the wire).
    #[error("chat not found")]
    NotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error(transparent)]
    Store(#[from] veil_store::StoreError),

    #[error(transparent)]
    Vault(#[from] veil_vault::VaultError),

    #[error("{message}")]
    Invalid { message: String },
}

impl ChatError {
    #[must_use]
    pub fn invalid(message: impl std::fmt::Display) -> Self {
        Self::Invalid {
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
