//! Shared gateway runtime state: live sessions keyed by (user, device) in a
//! user-sharded registry, plus the collaborator handles and repository every
//! handler needs.

use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {tokio::sync::mpsc, tokio_util::sync::CancellationToken, tracing::{debug, warn}};

use {
    veil_chat::ChatRepository,
    veil_common::{ChatId, DeviceFingerprint, UserHash},
    veil_config::VeilConfig,
    veil_protocol::{ServerFrame, close_codes, error_codes},
    veil_service_traits::{
        AuthService, NoopAuthService, NoopProfileService, NoopWorkerQueue, ProfileService,
        WorkerQueue,
    },
};

/// Number of user shards in the session registry. Cross-shard operations
/// never hold more than one shard lock at a time.
const SHARDS: usize = 16;

// ── Outbound queue items ─────────────────────────────────────────────────────

/// What the per-session write loop consumes.
#[derive(Debug)]
pub enum Outbound {
    /// A serialized frame.
    Frame(String),
    /// Close the socket with the given code and reason, then stop.
    Close(u16, String),
}

// ── Session ──────────────────────────────────────────────────────────────────

/// One live WebSocket bound to (user, device). Frames enqueued here are
/// delivered in order by the session's write loop.
pub struct Session {
    pub conn_id: String,
    pub user: UserHash,
    pub device: DeviceFingerprint,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    active_chat: Mutex<Option<ChatId>>,
    last_seen: Mutex<Instant>,
    connected_at: Instant,
}

impl Session {
    pub fn new(
        user: UserHash,
        device: DeviceFingerprint,
        tx: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            conn_id: uuid::Uuid::new_v4().to_string(),
            user,
            device,
            tx,
            cancel,
            active_chat: Mutex::new(None),
            last_seen: Mutex::new(now),
            connected_at: now,
        }
    }

    /// Enqueue a frame. Queue overflow closes the session with a
    /// recoverable code — the client reconnects and re-syncs.
    pub fn send(&self, frame: &ServerFrame) -> bool {
        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(e) => {
                warn!(conn = %self.conn_id, error = %e, "failed to serialize frame");
                return false;
            },
        };
        match self.tx.try_send(Outbound::Frame(json)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn = %self.conn_id, "outbound queue overflow, closing session");
                self.close(close_codes::RECOVERABLE, error_codes::QUEUE_OVERFLOW);
                false
            },
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Close the session: best-effort close frame, then cancel both tasks.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.try_send(Outbound::Close(code, reason.to_string()));
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Refresh the heartbeat stamp.
    pub fn touch(&self) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.active_chat.lock().ok().and_then(|c| c.clone())
    }

    /// Per-device only; never touches any persistent last-opened state.
    pub fn set_active_chat(&self, chat_id: Option<ChatId>) {
        if let Ok(mut active) = self.active_chat.lock() {
            *active = chat_id;
        }
    }
}

// ── Connection manager ───────────────────────────────────────────────────────

type Shard = Mutex<HashMap<UserHash, HashMap<DeviceFingerprint, Arc<Session>>>>;

/// Registry of live sessions, sharded by user hash to bound contention.
pub struct ConnectionManager {
    shards: Vec<Shard>,
    session_count: AtomicU64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            session_count: AtomicU64::new(0),
        }
    }

    fn shard(&self, user: &UserHash) -> &Shard {
        let mut hasher = DefaultHasher::new();
        user.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    /// Register a session. If the same (user, device) already holds one, the
    /// older session is closed and replaced.
    pub fn accept(&self, session: Arc<Session>) {
        let replaced = {
            let Ok(mut shard) = self.shard(&session.user).lock() else {
                return;
            };
            shard
                .entry(session.user.clone())
                .or_default()
                .insert(session.device.clone(), Arc::clone(&session))
        };
        if let Some(old) = replaced {
            debug!(conn = %old.conn_id, "replacing older session for device");
            old.close(close_codes::REPLACED, error_codes::SESSION_REPLACED);
        } else {
            self.session_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a session, but only if `conn_id` still owns the slot — a
    /// replacement session must not be evicted by its predecessor's cleanup.
    pub fn remove(&self, user: &UserHash, device: &DeviceFingerprint, conn_id: &str) {
        let Ok(mut shard) = self.shard(user).lock() else {
            return;
        };
        let Some(devices) = shard.get_mut(user) else {
            return;
        };
        if devices.get(device).is_some_and(|s| s.conn_id == conn_id) {
            devices.remove(device);
            self.session_count.fetch_sub(1, Ordering::Relaxed);
            if devices.is_empty() {
                shard.remove(user);
            }
        }
    }

    pub fn session(
        &self,
        user: &UserHash,
        device: &DeviceFingerprint,
    ) -> Option<Arc<Session>> {
        let shard = self.shard(user).lock().ok()?;
        shard.get(user)?.get(device).cloned()
    }

    /// Snapshot of a user's sessions; fan-out happens outside the lock.
    pub fn sessions_for_user(&self, user: &UserHash) -> Vec<Arc<Session>> {
        self.shard(user)
            .lock()
            .ok()
            .and_then(|shard| shard.get(user).map(|d| d.values().cloned().collect()))
            .unwrap_or_default()
    }

    pub fn set_active_chat(
        &self,
        user: &UserHash,
        device: &DeviceFingerprint,
        chat_id: Option<ChatId>,
    ) {
        if let Some(session) = self.session(user, device) {
            session.set_active_chat(chat_id);
        }
    }

    pub fn session_count(&self) -> u64 {
        self.session_count.load(Ordering::Relaxed)
    }

    /// Sessions whose heartbeat stamp is older than `window`. One shard lock
    /// at a time.
    pub fn idle_sessions(&self, window: Duration) -> Vec<Arc<Session>> {
        let mut idle = Vec::new();
        for shard in &self.shards {
            if let Ok(shard) = shard.lock() {
                for devices in shard.values() {
                    for session in devices.values() {
                        if session.idle_for() > window {
                            idle.push(Arc::clone(session));
                        }
                    }
                }
            }
        }
        idle
    }

    /// Close every session (graceful shutdown).
    pub fn close_all(&self, code: u16, reason: &str) {
        for shard in &self.shards {
            if let Ok(shard) = shard.lock() {
                for devices in shard.values() {
                    for session in devices.values() {
                        session.close(code, reason);
                    }
                }
            }
        }
    }
}

// ── Collaborators & shared state ─────────────────────────────────────────────

/// Collaborator handles the core consumes. Construction-time record; nothing
/// is looked up ambiently.
#[derive(Clone)]
pub struct CoreServices {
    pub auth: Arc<dyn AuthService>,
    pub profile: Arc<dyn ProfileService>,
    pub worker_queue: Arc<dyn WorkerQueue>,
}

impl CoreServices {
    /// No-op collaborators; the gateway runs but rejects all tokens.
    pub fn noop() -> Self {
        Self {
            auth: Arc::new(NoopAuthService),
            profile: Arc::new(NoopProfileService),
            worker_queue: Arc::new(NoopWorkerQueue),
        }
    }
}

/// Shared gateway runtime state, wrapped in `Arc` across tasks.
pub struct GatewayState {
    pub repo: ChatRepository,
    pub connections: ConnectionManager,
    pub services: CoreServices,
    pub config: VeilConfig,
}

impl GatewayState {
    pub fn new(repo: ChatRepository, services: CoreServices, config: VeilConfig) -> Arc<Self> {
        Arc::new(Self {
            repo,
            connections: ConnectionManager::new(),
            services,
            config,
        })
    }

    /// Derive the salted user hash for an authenticated plaintext user id.
    pub fn user_hash(&self, user_id: &str) -> UserHash {
        UserHash::derive(&self.config.auth.user_hash_salt, user_id)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn session(user: &UserHash, device: &str, cap: usize) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(cap);
        let session = Arc::new(Session::new(
            user.clone(),
            DeviceFingerprint::new(device),
            tx,
            CancellationToken::new(),
        ));
        (session, rx)
    }

    #[tokio::test]
    async fn accept_replaces_older_session_for_same_device() {
        let mgr = ConnectionManager::new();
        let user = UserHash::derive("s", "alice");
        let (old, _rx_old) = session(&user, "laptop", 8);
        let (new, _rx_new) = session(&user, "laptop", 8);

        mgr.accept(Arc::clone(&old));
        mgr.accept(Arc::clone(&new));

        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert_eq!(mgr.session_count(), 1);
        assert_eq!(
            mgr.session(&user, &DeviceFingerprint::new("laptop"))
                .unwrap()
                .conn_id,
            new.conn_id
        );
    }

    #[tokio::test]
    async fn stale_cleanup_does_not_evict_replacement() {
        let mgr = ConnectionManager::new();
        let user = UserHash::derive("s", "alice");
        let (old, _rx_old) = session(&user, "laptop", 8);
        let (new, _rx_new) = session(&user, "laptop", 8);

        mgr.accept(Arc::clone(&old));
        mgr.accept(Arc::clone(&new));
        // The replaced session's cleanup runs after the takeover.
        mgr.remove(&user, &old.device, &old.conn_id);

        assert!(mgr.session(&user, &new.device).is_some());
    }

    #[tokio::test]
    async fn queue_overflow_closes_the_session() {
        let user = UserHash::derive("s", "alice");
        let (session, _rx) = session(&user, "laptop", 1);

        assert!(session.send(&ServerFrame::Pong { ts: 1 }));
        // Queue full: the session must close rather than reorder or drop
        // silently.
        assert!(!session.send(&ServerFrame::Pong { ts: 2 }));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn active_chat_is_per_device() {
        let mgr = ConnectionManager::new();
        let user = UserHash::derive("s", "alice");
        let (a, _rx_a) = session(&user, "laptop", 8);
        let (b, _rx_b) = session(&user, "phone", 8);
        mgr.accept(Arc::clone(&a));
        mgr.accept(Arc::clone(&b));

        let chat = ChatId::from_parts(&user, "c42");
        mgr.set_active_chat(&user, &a.device, Some(chat.clone()));

        assert_eq!(a.active_chat(), Some(chat));
        assert_eq!(b.active_chat(), None);
    }
}
