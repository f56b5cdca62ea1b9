use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::VeilConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["veil.toml", "veil.yaml", "veil.yml", "veil.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<VeilConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply `VEIL_*`
/// environment overrides.
///
/// Search order:
/// 1. `./veil.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/veil/veil.{toml,yaml,yml,json}` (user-global)
///
/// Returns `VeilConfig::default()` (plus env overrides) if no config file is
/// found.
pub fn discover_and_load() -> VeilConfig {
    let mut cfg = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                VeilConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        VeilConfig::default()
    };
    cfg.apply_env_overrides();
    cfg
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/veil/
    if let Some(dirs) = directories::ProjectDirs::from("", "", "veil") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/veil/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "veil").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<VeilConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("veil.toml");
        std::fs::write(&path, "[gateway]\nport = 9090\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.gateway.port, 9090);
        assert_eq!(cfg.cache.hot_per_user, 3);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("veil.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(load_config(&path).is_err());
    }
}
