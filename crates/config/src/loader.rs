use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    tracing::{debug, info},
};

use crate::{env_overrides::apply_env_overrides, env_subst::substitute_env, schema::TanaMcpConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "tana-mcp.toml",
    "tana-mcp.yaml",
    "tana-mcp.yml",
    "tana-mcp.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<TanaMcpConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tana-mcp.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/tana-mcp/tana-mcp.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TanaMcpConfig::default()` if no config file is found. A file
/// that is found but does not load is an error, never a silent fallback.
pub fn discover_and_load() -> anyhow::Result<TanaMcpConfig> {
    load_found(find_config_file())
}

fn load_found(path: Option<PathBuf>) -> anyhow::Result<TanaMcpConfig> {
    let Some(path) = path else {
        debug!("no config file found, using defaults");
        return Ok(TanaMcpConfig::default());
    };

    debug!(path = %path.display(), "loading config");
    load_config(&path).with_context(|| format!("invalid config file {}", path.display()))
}

/// Full startup load: the explicit file (which must load) or discovery,
/// then the environment overlay.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<TanaMcpConfig> {
    let mut config = match explicit {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            load_config(path)?
        },
        None => discover_and_load()?,
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory: `~/.config/tana-mcp/`.
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("tana-mcp"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TanaMcpConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
