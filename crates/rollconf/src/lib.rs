//! Configuration loading for rollcall.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): things that physically cannot change
//!   at runtime - paths, bind address, telemetry endpoint, CORS origins.
//!
//! - **Bootstrap** (`BootstrapConfig`): policy values that seed runtime
//!   components - cooldown window, pool size, indicator durations.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, tables merge key by key):
//! 1. `/etc/rollcall/config.toml` (system)
//! 2. `~/.config/rollcall/config.toml` (user)
//! 3. `./rollcall.toml` or the `--config` path (local override)
//! 4. Environment variables (`ROLLCALL_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/rollcall"
//! gallery_file = "~/.local/share/rollcall/gallery.json"
//!
//! [bind]
//! http_port = 8000
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [bootstrap.attendance]
//! cooldown_secs = 300
//!
//! [bootstrap.pipeline]
//! workers = 4
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{
    AttendanceConfig, BootstrapConfig, DevicesConfig, IndicatorConfig, ModelsConfig,
    PipelineConfig, RecognitionConfig,
};
pub use infra::{BindConfig, CorsConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Config has wrong value types: {0}")]
    Deserialize(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Complete rollcall configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RollConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Bootstrap - seeds runtime state.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl RollConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing `./rollcall.toml`.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    ///
    /// The result is validated; see [`RollConfig::validate`].
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut table = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_table = loader::load_table(&path)?;
            loader::merge_tables(&mut table, file_table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(table)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tolerance = self.bootstrap.recognition.tolerance;
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(ConfigError::Invalid(format!(
                "recognition.tolerance must be between 0.0 and 1.0, got {}",
                tolerance
            )));
        }

        let pipeline = &self.bootstrap.pipeline;
        if pipeline.workers == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.workers must be at least 1".to_string(),
            ));
        }
        if pipeline.task_hard_cap_ms < pipeline.match_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "pipeline.task_hard_cap_ms ({}) must not be shorter than match_timeout_ms ({})",
                pipeline.task_hard_cap_ms, pipeline.match_timeout_ms
            )));
        }

        if self.bootstrap.devices.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "devices.channel_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Built by hand for stable section ordering and comments
        let mut out = String::new();
        let infra = &self.infra;
        let boot = &self.bootstrap;

        let _ = writeln!(out, "# rollcall configuration\n");

        let _ = writeln!(out, "[paths]");
        let _ = writeln!(out, "state_dir = \"{}\"", infra.paths.state_dir.display());
        let _ = writeln!(out, "gallery_file = \"{}\"", infra.paths.gallery_file.display());

        let _ = writeln!(out, "\n[bind]");
        let _ = writeln!(out, "host = \"{}\"", infra.bind.host);
        let _ = writeln!(out, "http_port = {}", infra.bind.http_port);

        let _ = writeln!(out, "\n[telemetry]");
        let _ = writeln!(out, "otlp_endpoint = \"{}\"", infra.telemetry.otlp_endpoint);
        let _ = writeln!(out, "log_level = \"{}\"", infra.telemetry.log_level);

        let _ = writeln!(out, "\n[cors]");
        let origins: Vec<String> = infra
            .cors
            .allowed_origins
            .iter()
            .map(|o| format!("\"{}\"", o))
            .collect();
        let _ = writeln!(out, "allowed_origins = [{}]", origins.join(", "));

        let _ = writeln!(out, "\n[bootstrap.models]");
        let _ = writeln!(out, "face_encoder = \"{}\"", boot.models.face_encoder);

        let _ = writeln!(out, "\n[bootstrap.recognition]");
        let _ = writeln!(out, "tolerance = {:?}", boot.recognition.tolerance);

        let _ = writeln!(out, "\n[bootstrap.attendance]");
        let _ = writeln!(out, "cooldown_secs = {}", boot.attendance.cooldown_secs);

        let _ = writeln!(out, "\n[bootstrap.pipeline]");
        let _ = writeln!(out, "workers = {}", boot.pipeline.workers);
        let _ = writeln!(out, "match_timeout_ms = {}", boot.pipeline.match_timeout_ms);
        let _ = writeln!(out, "task_hard_cap_ms = {}", boot.pipeline.task_hard_cap_ms);
        let _ = writeln!(
            out,
            "max_inflight_per_device = {}",
            boot.pipeline.max_inflight_per_device
        );

        let _ = writeln!(out, "\n[bootstrap.indicators]");
        let _ = writeln!(out, "positive_secs = {}", boot.indicators.positive_secs);
        let _ = writeln!(out, "negative_secs = {}", boot.indicators.negative_secs);

        let _ = writeln!(out, "\n[bootstrap.devices]");
        let _ = writeln!(out, "channel_capacity = {}", boot.devices.channel_capacity);
        let _ = writeln!(out, "send_timeout_ms = {}", boot.devices.send_timeout_ms);

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RollConfig::default();
        assert_eq!(config.infra.bind.http_port, 8000);
        assert_eq!(config.bootstrap.pipeline.workers, 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = RollConfig::default();
        config.infra.paths.state_dir = PathBuf::from("/srv/rollcall");
        config.infra.paths.gallery_file = PathBuf::from("/srv/rollcall/gallery.json");
        config.bootstrap.attendance.cooldown_secs = 42;

        let rendered = config.to_toml();
        assert!(rendered.contains("[paths]"));
        assert!(rendered.contains("[bootstrap.pipeline]"));

        let table: toml::Table = rendered.parse().unwrap();
        let reparsed = loader::from_table(table).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[bind]
http_port = 8123

[bootstrap.attendance]
cooldown_secs = 5
"#
        )
        .unwrap();

        let (config, sources) = RollConfig::load_with_sources_from(Some(file.path())).unwrap();
        assert_eq!(config.infra.bind.http_port, 8123);
        assert_eq!(config.bootstrap.attendance.cooldown_secs, 5);
        assert!(sources.files.iter().any(|p| p == file.path()));
    }

    #[test]
    fn test_validate_rejects_tolerance_out_of_range() {
        let mut config = RollConfig::default();
        config.bootstrap.recognition.tolerance = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = RollConfig::default();
        config.bootstrap.pipeline.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_hard_cap_below_timeout() {
        let mut config = RollConfig::default();
        config.bootstrap.pipeline.match_timeout_ms = 5_000;
        config.bootstrap.pipeline.task_hard_cap_ms = 1_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
