use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    schema::{TimetableConfig, UnmatchedRoutes},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "timetable.toml",
    "timetable.yaml",
    "timetable.yml",
    "timetable.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<TimetableConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./timetable.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/timetable/timetable.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TimetableConfig::default()` if no config file is found or the
/// file cannot be parsed.
pub fn discover_and_load() -> TimetableConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TimetableConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/timetable/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "timetable").map(|d| d.config_dir().to_path_buf())
}

/// Apply `TIMETABLE_*` environment variables on top of a loaded config.
pub fn apply_env_overrides(config: &mut TimetableConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut TimetableConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(bind) = lookup("TIMETABLE_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = lookup("TIMETABLE_PORT") {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid TIMETABLE_PORT"),
        }
    }
    if let Some(url) = lookup("TIMETABLE_DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(enabled) = lookup("TIMETABLE_METRICS_ENABLED") {
        match enabled.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => config.metrics.enabled = true,
            "0" | "false" | "no" | "off" => config.metrics.enabled = false,
            other => warn!(value = other, "ignoring invalid TIMETABLE_METRICS_ENABLED"),
        }
    }
    if let Some(policy) = lookup("TIMETABLE_UNMATCHED_ROUTES") {
        match policy.as_str() {
            "collapse" => config.metrics.unmatched_routes = UnmatchedRoutes::Collapse,
            "normalize" => config.metrics.unmatched_routes = UnmatchedRoutes::Normalize,
            "raw_path" => config.metrics.unmatched_routes = UnmatchedRoutes::RawPath,
            other => warn!(value = other, "ignoring invalid TIMETABLE_UNMATCHED_ROUTES"),
        }
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TimetableConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
