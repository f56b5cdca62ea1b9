//! Secret store for per-chat content-encryption keys.
//!
//! Every chat owns one content-encryption key, held outside the sync core and
//! referenced by an opaque [`VaultKeyRef`]. The core never decrypts chat
//! content; it only brokers key creation and retrieval for clients. Access is
//! audited out-of-band via structured logs.

pub mod error;
pub mod memory;
pub mod traits;

use serde::{Deserialize, Serialize};

pub use {error::VaultError, memory::MemoryVault, traits::SecretStore};

/// Opaque handle to a key held by the secret store. Safe to persist and to
/// put on the wire; reveals nothing about the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultKeyRef(String);

impl VaultKeyRef {
    pub fn generate() -> Self {
        Self(format!("vkr_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VaultKeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
