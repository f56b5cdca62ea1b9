//! In-memory secret store backend.

use {dashmap::DashMap, tracing::info, zeroize::Zeroizing};

use crate::{
    VaultKeyRef,
    error::{Result, VaultError},
    traits::SecretStore,
};

/// Process-local key storage. Keys live only in memory and are wiped on
/// drop; suitable for development and tests, not for multi-node deployments.
#[derive(Default)]
pub struct MemoryVault {
    keys: DashMap<VaultKeyRef, Zeroizing<[u8; 32]>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait::async_trait]
impl SecretStore for MemoryVault {
    async fn create_key(&self, chat_id: &str) -> Result<VaultKeyRef> {
        let key_ref = VaultKeyRef::generate();
        let mut key = Zeroizing::new([0u8; 32]);
        rand::RngCore::fill_bytes(&mut rand::rng(), key.as_mut());
        self.keys.insert(key_ref.clone(), key);
        info!(chat = chat_id, key_ref = %key_ref, "provisioned chat key");
        Ok(key_ref)
    }

    async fn get_key(&self, key_ref: &VaultKeyRef) -> Result<Zeroizing<[u8; 32]>> {
        info!(key_ref = %key_ref, "key access");
        self.keys
            .get(key_ref)
            .map(|k| k.clone())
            .ok_or(VaultError::UnknownRef)
    }

    async fn delete_key(&self, key_ref: &VaultKeyRef) -> Result<()> {
        if self.keys.remove(key_ref).is_some() {
            info!(key_ref = %key_ref, "key deleted");
        }
        Ok(())
    }
}
