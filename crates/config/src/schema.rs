//! Config schema types (gateway, cache, limits, heartbeat, store, auth, sync).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VeilConfig {
    pub gateway: GatewayConfig,
    pub cache: CacheConfig,
    pub limits: LimitsConfig,
    pub heartbeat: HeartbeatConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
}

/// WebSocket listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8443,
        }
    }
}

/// Two-tier chat cache bounds. Both tiers are per-user LRU with a sliding
/// TTL checked lazily on access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub hot_per_user: usize,
    pub warm_per_user: usize,
    pub sliding_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_per_user: 3,
            warm_per_user: 100,
            sliding_ttl_seconds: 1800,
        }
    }
}

/// Per-session resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Bounded outbound frame queue; overflow closes the session.
    pub session_queue_cap: usize,
    pub frame_rate_per_second: u32,
    pub expensive_rate_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            session_queue_cap: 256,
            frame_rate_per_second: 30,
            expensive_rate_per_minute: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_seconds: u64,
    pub miss_threshold: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            miss_threshold: 2,
        }
    }
}

/// Document store connection and failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path. `:memory:` for an ephemeral store.
    pub path: String,
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "veil.db".into(),
            timeout_ms: 5000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Salt mixed into user-id hashes. Must stay stable for the lifetime of
    /// the deployment or every chat id changes.
    pub user_hash_salt: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_hash_salt: "veil-dev-salt".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// When enabled, an explicit chat open also updates the profile
    /// collaborator's last-opened chat. `set_active_chat` never does.
    pub persist_active_chat_as_last_opened: bool,
}

impl VeilConfig {
    /// Apply `VEIL_*` environment overrides for the tunables the core
    /// recognizes. Malformed values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        fn parse_into<T: std::str::FromStr>(name: &str, slot: &mut T) {
            if let Ok(raw) = std::env::var(name) {
                match raw.parse::<T>() {
                    Ok(v) => *slot = v,
                    Err(_) => tracing::warn!(var = name, value = %raw, "ignoring unparsable env override"),
                }
            }
        }

        parse_into("VEIL_HOST", &mut self.gateway.host);
        parse_into("VEIL_PORT", &mut self.gateway.port);
        parse_into("VEIL_HOT_CACHE_PER_USER", &mut self.cache.hot_per_user);
        parse_into("VEIL_WARM_CACHE_PER_USER", &mut self.cache.warm_per_user);
        parse_into(
            "VEIL_CACHE_SLIDING_TTL_SECONDS",
            &mut self.cache.sliding_ttl_seconds,
        );
        parse_into(
            "VEIL_SESSION_OUTBOUND_QUEUE_CAP",
            &mut self.limits.session_queue_cap,
        );
        parse_into(
            "VEIL_FRAME_RATE_LIMIT_PER_SECOND",
            &mut self.limits.frame_rate_per_second,
        );
        parse_into(
            "VEIL_EXPENSIVE_RATE_LIMIT_PER_MINUTE",
            &mut self.limits.expensive_rate_per_minute,
        );
        parse_into(
            "VEIL_HEARTBEAT_INTERVAL_SECONDS",
            &mut self.heartbeat.interval_seconds,
        );
        parse_into(
            "VEIL_HEARTBEAT_MISS_THRESHOLD",
            &mut self.heartbeat.miss_threshold,
        );
        parse_into("VEIL_DOCUMENT_STORE_PATH", &mut self.store.path);
        parse_into("VEIL_DOCUMENT_STORE_TIMEOUT_MS", &mut self.store.timeout_ms);
        parse_into("VEIL_STORE_MAX_RETRIES", &mut self.store.retry.max_retries);
        parse_into(
            "VEIL_STORE_BASE_BACKOFF_MS",
            &mut self.store.retry.base_backoff_ms,
        );
        parse_into("VEIL_USER_HASH_SALT", &mut self.auth.user_hash_salt);
        parse_into(
            "VEIL_PERSIST_ACTIVE_CHAT_AS_LAST_OPENED",
            &mut self.sync.persist_active_chat_as_last_opened,
        );
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = VeilConfig::default();
        assert_eq!(cfg.cache.hot_per_user, 3);
        assert_eq!(cfg.cache.warm_per_user, 100);
        assert_eq!(cfg.cache.sliding_ttl_seconds, 1800);
        assert_eq!(cfg.heartbeat.interval_seconds, 30);
        assert!(!cfg.sync.persist_active_chat_as_last_opened);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: VeilConfig = toml::from_str("[cache]\nhot_per_user = 5\n").unwrap();
        assert_eq!(cfg.cache.hot_per_user, 5);
        assert_eq!(cfg.cache.warm_per_user, 100);
        assert_eq!(cfg.limits.session_queue_cap, 256);
    }
}
