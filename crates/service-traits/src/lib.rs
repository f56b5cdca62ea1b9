//! Collaborator trait interfaces consumed by the sync core.
//!
//! Authentication, user profiles, and the worker queue live outside the core;
//! the gateway only sees these traits. Each trait has a `Noop` implementation
//! so the gateway can run standalone, plus an in-memory implementation used by
//! the dev binary and the integration tests.

use {async_trait::async_trait, serde::Deserialize, serde::Serialize, tracing::warn};

use veil_common::{ChatId, DeviceFingerprint, MessageId, UserHash};

// ── Error type ───────────────────────────────────────────────────────────────

/// Error type returned by collaborator methods.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    Message { message: String },
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
}

impl ServiceError {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }
}

impl From<String> for ServiceError {
    fn from(value: String) -> Self {
        Self::message(value)
    }
}

impl From<&str> for ServiceError {
    fn from(value: &str) -> Self {
        Self::message(value)
    }
}

impl From<ServiceError> for veil_protocol::ErrorBody {
    fn from(err: ServiceError) -> Self {
        Self {
            code: veil_protocol::error_codes::UPSTREAM_UNAVAILABLE.into(),
            message: err.to_string(),
            chat_id: None,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// ── Authentication ──────────────────────────────────────────────────────────

/// Outcome of a device-fingerprint check at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCheck {
    /// Fingerprint is in the user's known set; traffic may flow.
    Known,
    /// Token valid but fingerprint unseen; a step-up code is required
    /// before any frame is processed.
    StepUpRequired,
}

/// Token validation and the per-user known-device registry. Token issuance
/// is out of scope; the core only validates.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Resolve a bearer token to a plaintext user id, or fail.
    async fn validate_token(&self, token: &str) -> ServiceResult<String>;

    /// Compare `fp` against the user's known fingerprint set.
    async fn check_device(
        &self,
        user: &UserHash,
        fp: &DeviceFingerprint,
    ) -> ServiceResult<DeviceCheck>;

    /// Validate an out-of-band one-time step-up code. `Ok(true)` means the
    /// device may be registered and traffic accepted.
    async fn verify_step_up(
        &self,
        user: &UserHash,
        fp: &DeviceFingerprint,
        code: &str,
    ) -> ServiceResult<bool>;

    /// Add `fp` to the user's known set after a successful step-up.
    async fn register_device(&self, user: &UserHash, fp: &DeviceFingerprint) -> ServiceResult<()>;
}

pub struct NoopAuthService;

#[async_trait]
impl AuthService for NoopAuthService {
    async fn validate_token(&self, _token: &str) -> ServiceResult<String> {
        Err("auth service not configured".into())
    }

    async fn check_device(
        &self,
        _user: &UserHash,
        _fp: &DeviceFingerprint,
    ) -> ServiceResult<DeviceCheck> {
        Err("auth service not configured".into())
    }

    async fn verify_step_up(
        &self,
        _user: &UserHash,
        _fp: &DeviceFingerprint,
        _code: &str,
    ) -> ServiceResult<bool> {
        Ok(false)
    }

    async fn register_device(
        &self,
        _user: &UserHash,
        _fp: &DeviceFingerprint,
    ) -> ServiceResult<()> {
        Ok(())
    }
}

/// In-memory token table with a known-device registry and static step-up
/// codes. Backs the dev binary and the integration tests.
#[derive(Default)]
pub struct MemoryAuthService {
    tokens: dashmap::DashMap<String, String>,
    known_devices: dashmap::DashMap<String, Vec<String>>,
    step_up_codes: dashmap::DashMap<String, String>,
}

impl MemoryAuthService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_token(&self, token: impl Into<String>, user_id: impl Into<String>) {
        self.tokens.insert(token.into(), user_id.into());
    }

    pub fn trust_device(&self, user: &UserHash, fp: &DeviceFingerprint) {
        self.known_devices
            .entry(user.as_str().to_string())
            .or_default()
            .push(fp.as_str().to_string());
    }

    /// Arm a one-time step-up code for a user.
    pub fn set_step_up_code(&self, user: &UserHash, code: impl Into<String>) {
        self.step_up_codes
            .insert(user.as_str().to_string(), code.into());
    }
}

#[async_trait]
impl AuthService for MemoryAuthService {
    async fn validate_token(&self, token: &str) -> ServiceResult<String> {
        self.tokens
            .get(token)
            .map(|u| u.clone())
            .ok_or_else(|| "invalid token".into())
    }

    async fn check_device(
        &self,
        user: &UserHash,
        fp: &DeviceFingerprint,
    ) -> ServiceResult<DeviceCheck> {
        let known = self
            .known_devices
            .get(user.as_str())
            .map(|v| v.iter().any(|d| d == fp.as_str()))
            .unwrap_or(false);
        Ok(if known {
            DeviceCheck::Known
        } else {
            DeviceCheck::StepUpRequired
        })
    }

    async fn verify_step_up(
        &self,
        user: &UserHash,
        _fp: &DeviceFingerprint,
        code: &str,
    ) -> ServiceResult<bool> {
        let ok = self
            .step_up_codes
            .get(user.as_str())
            .map(|c| c.as_str() == code)
            .unwrap_or(false);
        if ok {
            // One-time: a code never validates twice.
            self.step_up_codes.remove(user.as_str());
        }
        Ok(ok)
    }

    async fn register_device(&self, user: &UserHash, fp: &DeviceFingerprint) -> ServiceResult<()> {
        self.trust_device(user, fp);
        Ok(())
    }
}

// ── User profile ─────────────────────────────────────────────────────────────

/// Last-opened-chat bookkeeping. Written only on explicit user actions —
/// never from `set_active_chat`.
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn get_last_opened_chat(&self, user: &UserHash) -> ServiceResult<Option<ChatId>>;
    async fn set_last_opened_chat(&self, user: &UserHash, chat: &ChatId) -> ServiceResult<()>;
}

pub struct NoopProfileService;

#[async_trait]
impl ProfileService for NoopProfileService {
    async fn get_last_opened_chat(&self, _user: &UserHash) -> ServiceResult<Option<ChatId>> {
        Ok(None)
    }

    async fn set_last_opened_chat(&self, _user: &UserHash, _chat: &ChatId) -> ServiceResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryProfileService {
    last_opened: dashmap::DashMap<String, String>,
}

impl MemoryProfileService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileService for MemoryProfileService {
    async fn get_last_opened_chat(&self, user: &UserHash) -> ServiceResult<Option<ChatId>> {
        Ok(self
            .last_opened
            .get(user.as_str())
            .map(|c| ChatId::from_string(c.clone())))
    }

    async fn set_last_opened_chat(&self, user: &UserHash, chat: &ChatId) -> ServiceResult<()> {
        self.last_opened
            .insert(user.as_str().to_string(), chat.as_str().to_string());
        Ok(())
    }
}

// ── Worker queue ─────────────────────────────────────────────────────────────

/// A downstream preprocessing job enqueued after a user message lands. The
/// assistant pipeline consumes these and answers back through the gateway's
/// worker ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessJob {
    pub chat_id: ChatId,
    pub user_hash: UserHash,
    pub message_id: MessageId,
}

#[async_trait]
pub trait WorkerQueue: Send + Sync {
    async fn enqueue(&self, job: PreprocessJob) -> ServiceResult<()>;
}

/// Logs and drops jobs. Keeps the gateway functional when no assistant
/// pipeline is attached.
pub struct NoopWorkerQueue;

#[async_trait]
impl WorkerQueue for NoopWorkerQueue {
    async fn enqueue(&self, job: PreprocessJob) -> ServiceResult<()> {
        warn!(chat = %job.chat_id, message = %job.message_id, "worker queue not configured, dropping job");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_auth_resolves_tokens() {
        let auth = MemoryAuthService::new();
        auth.insert_token("tok-1", "alice");
        assert_eq!(auth.validate_token("tok-1").await.unwrap(), "alice");
        assert!(auth.validate_token("tok-2").await.is_err());
    }

    #[tokio::test]
    async fn unknown_device_requires_step_up() {
        let auth = MemoryAuthService::new();
        let user = UserHash::derive("s", "alice");
        let fp = DeviceFingerprint::new("laptop");
        assert_eq!(
            auth.check_device(&user, &fp).await.unwrap(),
            DeviceCheck::StepUpRequired
        );

        auth.set_step_up_code(&user, "123456");
        assert!(!auth.verify_step_up(&user, &fp, "000000").await.unwrap());
        assert!(auth.verify_step_up(&user, &fp, "123456").await.unwrap());
        // One-time code is burned.
        assert!(!auth.verify_step_up(&user, &fp, "123456").await.unwrap());

        auth.register_device(&user, &fp).await.unwrap();
        assert_eq!(
            auth.check_device(&user, &fp).await.unwrap(),
            DeviceCheck::Known
        );
    }
}
