//! Configuration management for the visitor throttle.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

use crate::error::{Result, ThrottleError};

/// Prefix for environment variable overrides, e.g. `VISITOR_THROTTLE_THROTTLE__BURST=10`.
const ENV_PREFIX: &str = "VISITOR_THROTTLE";

/// Main configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-client throttle configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

/// Token bucket and sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Steady refill rate in tokens per second
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Bucket capacity; also the burst a fresh client may spend at once
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// How often the background sweep wakes, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Idle time after which a visitor is evicted, in seconds
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            sweep_interval_secs: default_sweep_interval(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_requests_per_second() -> f64 {
    2.0
}

fn default_burst() -> u32 {
    5
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_stale_after() -> u64 {
    180
}

impl ThrottleConfig {
    /// Interval between background sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Idle duration after which a visitor is considered stale.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Reject settings that would make the limiter nonsensical.
    pub fn validate(&self) -> Result<()> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(ThrottleError::Config(format!(
                "requests_per_second must be a positive number, got {}",
                self.requests_per_second
            )));
        }
        if self.burst == 0 {
            return Err(ThrottleError::Config(
                "burst must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ThrottleError::Config(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }

        // Both durations are added to instants; reject values that overflow.
        let now = Instant::now();
        if now.checked_add(self.sweep_interval()).is_none() {
            return Err(ThrottleError::Config(format!(
                "sweep_interval_secs is out of range, got {}",
                self.sweep_interval_secs
            )));
        }
        if now.checked_add(self.stale_after()).is_none() {
            return Err(ThrottleError::Config(format!(
                "stale_after_secs is out of range, got {}",
                self.stale_after_secs
            )));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Load configuration from a file, layered with `VISITOR_THROTTLE_*` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading service configuration");

        let config: ServiceConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.throttle.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.throttle.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_values() {
        let config = ServiceConfig::default();

        assert_eq!(config.server.http_addr.port(), 8000);
        assert_eq!(config.throttle.requests_per_second, 2.0);
        assert_eq!(config.throttle.burst, 5);
        assert_eq!(config.throttle.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.throttle.stale_after(), Duration::from_secs(180));
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.throttle.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial_overrides() {
        let yaml = r#"
server:
  http_addr: "127.0.0.1:9000"
throttle:
  burst: 10
logging:
  format: json
"#;

        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.throttle.burst, 10);
        assert_eq!(config.throttle.requests_per_second, 2.0);
        assert_eq!(config.throttle.stale_after_secs, 180);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_from_yaml_empty_document_uses_defaults() {
        let config = ServiceConfig::from_yaml("{}").unwrap();
        assert_eq!(config.throttle, ThrottleConfig::default());
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = ThrottleConfig {
                requests_per_second: rate,
                ..ThrottleConfig::default()
            };
            assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));
        }
    }

    #[test]
    fn test_rejects_zero_burst() {
        let config = ThrottleConfig {
            burst: 0,
            ..ThrottleConfig::default()
        };
        assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_sweep_interval() {
        let config = ThrottleConfig {
            sweep_interval_secs: 0,
            ..ThrottleConfig::default()
        };
        assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_rejects_out_of_range_intervals() {
        let config = ThrottleConfig {
            sweep_interval_secs: u64::MAX,
            ..ThrottleConfig::default()
        };
        assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));

        let config = ThrottleConfig {
            stale_after_secs: u64::MAX,
            ..ThrottleConfig::default()
        };
        assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_from_yaml_rejects_invalid_throttle() {
        let result = ServiceConfig::from_yaml("throttle:\n  burst: 0\n");
        assert!(matches!(result, Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "visitor-throttle-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, "throttle:\n  requests_per_second: 4.5\n  burst: 8\n").unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.throttle.requests_per_second, 4.5);
        assert_eq!(config.throttle.burst, 8);
        assert_eq!(config.throttle.sweep_interval_secs, 60);
    }

    #[test]
    fn test_load_applies_environment_overrides() {
        let path = std::env::temp_dir().join(format!(
            "visitor-throttle-env-{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, "throttle:\n  stale_after_secs: 60\n").unwrap();

        // Other tests load files too; only touch a field none of them asserts on.
        std::env::set_var("VISITOR_THROTTLE_THROTTLE__STALE_AFTER_SECS", "240");
        let result = ServiceConfig::load(&path);
        std::env::remove_var("VISITOR_THROTTLE_THROTTLE__STALE_AFTER_SECS");
        std::fs::remove_file(&path).unwrap();

        let config = result.unwrap();
        assert_eq!(config.throttle.stale_after_secs, 240);
        assert_eq!(config.throttle.burst, 5);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = ServiceConfig::load("/nonexistent/visitor-throttle.yaml");
        assert!(matches!(result, Err(ThrottleError::Settings(_))));
    }
}
