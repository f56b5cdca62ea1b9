//! Document store error types.

/// Errors produced by document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The operation did not complete within its deadline.
    #[error("store operation timed out")]
    Timeout,

    /// The backend is (temporarily) unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row that cannot be interpreted. Never retried.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Transient failures are retried within the configured policy;
    /// everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Unavailable(_) => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed
            ),
            Self::Corrupt(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
