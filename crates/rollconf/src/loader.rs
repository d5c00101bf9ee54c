//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, RollConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/rollcall/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("rollcall/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("rollcall.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`. Tables merge key by key, everything
/// else (including arrays) is replaced.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a typed config, filling defaults.
pub fn from_table(table: toml::Table) -> Result<RollConfig, ConfigError> {
    let mut config: RollConfig = toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Deserialize(e.to_string()))?;

    config.infra.paths.state_dir = expand_path(&config.infra.paths.state_dir.to_string_lossy());
    config.infra.paths.gallery_file =
        expand_path(&config.infra.paths.gallery_file.to_string_lossy());

    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut RollConfig, sources: &mut ConfigSources) {
    let mut take = |name: &str| -> Option<String> {
        let value = env::var(name).ok()?;
        sources.env_overrides.push(name.to_string());
        Some(value)
    };

    if let Some(v) = take("ROLLCALL_STATE_DIR") {
        config.infra.paths.state_dir = expand_path(&v);
    }
    if let Some(v) = take("ROLLCALL_GALLERY_FILE") {
        config.infra.paths.gallery_file = expand_path(&v);
    }

    if let Some(v) = take("ROLLCALL_HOST") {
        config.infra.bind.host = v;
    }
    if let Some(port) = take("ROLLCALL_HTTP_PORT").and_then(|v| v.parse().ok()) {
        config.infra.bind.http_port = port;
    }

    if let Some(v) = take("ROLLCALL_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
    }
    // Standard OTEL variable wins over ours
    if let Some(v) = take("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
    }
    if let Some(v) = take("ROLLCALL_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
    }
    if let Some(v) = take("RUST_LOG") {
        config.infra.telemetry.log_level = v;
    }

    if let Some(v) = take("ROLLCALL_ALLOWED_ORIGINS") {
        config.infra.cors.allowed_origins = v
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
    }

    if let Some(v) = take("ROLLCALL_FACE_ENCODER") {
        config.bootstrap.models.face_encoder = v;
    }
    if let Some(tolerance) = take("ROLLCALL_TOLERANCE").and_then(|v| v.parse().ok()) {
        config.bootstrap.recognition.tolerance = tolerance;
    }
    if let Some(secs) = take("ROLLCALL_COOLDOWN_SECS").and_then(|v| v.parse().ok()) {
        config.bootstrap.attendance.cooldown_secs = secs;
    }
    if let Some(workers) = take("ROLLCALL_WORKERS").and_then(|v| v.parse().ok()) {
        config.bootstrap.pipeline.workers = workers;
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
