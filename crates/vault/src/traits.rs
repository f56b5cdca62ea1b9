//! Secret store trait for swappable key backends.

use zeroize::Zeroizing;

use crate::{VaultKeyRef, error::Result};

/// Holder of per-chat content-encryption keys.
///
/// Implementations can be swapped without touching the sync core: the
/// in-memory backend here, or an external KMS in production. Key bytes are
/// always returned in a [`Zeroizing`] wrapper so they are wiped on drop.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Provision a fresh 256-bit key for `chat_id` and return its handle.
    async fn create_key(&self, chat_id: &str) -> Result<VaultKeyRef>;

    /// Fetch key bytes by handle.
    async fn get_key(&self, key_ref: &VaultKeyRef) -> Result<Zeroizing<[u8; 32]>>;

    /// Drop the key behind `key_ref`. Idempotent.
    async fn delete_key(&self, key_ref: &VaultKeyRef) -> Result<()>;
}
