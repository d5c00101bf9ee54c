//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for rollcall state and data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for runtime state (attendance snapshot).
    /// Default: ~/.local/share/rollcall
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,

    /// Gallery of known face encodings (JSON).
    /// Default: ~/.local/share/rollcall/gallery.json
    #[serde(default = "PathsConfig::default_gallery_file")]
    pub gallery_file: PathBuf,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/rollcall"))
            .unwrap_or_else(|| PathBuf::from(".local/share/rollcall"))
    }

    fn default_gallery_file() -> PathBuf {
        Self::default_state_dir().join("gallery.json")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            gallery_file: Self::default_gallery_file(),
        }
    }
}

/// Network bind address for the HTTP/WebSocket listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Default: 8000
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_http_port() -> u16 {
        8000
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            http_port: Self::default_http_port(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Empty disables export.
    /// Default: empty
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log filter directive (trace, debug, info, warn, error, or EnvFilter syntax).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Cross-origin policy for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; `"*"` allows any.
    #[serde(default = "CorsConfig::default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    fn default_allowed_origins() -> Vec<String> {
        vec!["*".to_string()]
    }

    pub fn allows_any(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Self::default_allowed_origins(),
        }
    }
}

/// Infrastructure configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub cors: CorsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr() {
        let bind = BindConfig::default();
        assert_eq!(bind.addr(), "0.0.0.0:8000");
    }

    #[test]
    fn test_gallery_lives_under_state_dir() {
        let paths = PathsConfig::default();
        assert!(paths.gallery_file.starts_with(&paths.state_dir));
    }

    #[test]
    fn test_cors_wildcard() {
        assert!(CorsConfig::default().allows_any());
        let strict = CorsConfig {
            allowed_origins: vec!["https://dash.example".to_string()],
        };
        assert!(!strict.allows_any());
    }
}
