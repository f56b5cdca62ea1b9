//! Configuration schema and loading for the veil sync core.
//!
//! Config is discovered from `veil.{toml,yaml,yml,json}` (project-local, then
//! `~/.config/veil/`), run through `${ENV_VAR}` substitution, and finally
//! overridden by `VEIL_*` environment variables for the tunables the core
//! recognizes.

mod env_subst;
mod loader;
mod schema;

pub use {
    env_subst::substitute_env,
    loader::{config_dir, discover_and_load, load_config},
    schema::{
        AuthConfig, CacheConfig, GatewayConfig, HeartbeatConfig, LimitsConfig, RetryPolicy,
        StoreConfig, SyncConfig, VeilConfig,
    },
};
