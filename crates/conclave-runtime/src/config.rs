//! Executive configuration.
//!
//! Configuration is layered with figment: built-in defaults, then a
//! `conclave.toml` in the working directory, then environment variables
//! with the `CONCLAVE_` prefix and `__` as section separator
//! (`CONCLAVE_LOGGING__LEVEL=debug` maps to `logging.level = "debug"`).

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Root executive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Whether the built-in default engines are linked at startup.
    #[serde(default = "default_default_services")]
    pub default_services: bool,

    /// Additional engines to link at startup, beyond the defaults.
    #[serde(default)]
    pub engines: Vec<EngineRef>,

    /// Upper bound on one coalesced message, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Closed process group the executive joins.
    #[serde(default = "default_group")]
    pub group: String,

    /// This node's identity within the cluster.
    #[serde(default = "default_nodeid")]
    pub nodeid: u32,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            default_services: default_default_services(),
            engines: Vec::new(),
            max_message_size: default_max_message_size(),
            group: default_group(),
            nodeid: default_nodeid(),
        }
    }
}

impl ExecConfig {
    /// Loads configuration from defaults, `conclave.toml`, and the
    /// environment, in that priority order.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file("conclave.toml"))
                .merge(Env::prefixed("CONCLAVE_").split("__")),
        )
    }

    /// Extracts a configuration from a prepared figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        debug!(
            group = %config.group,
            nodeid = config.nodeid,
            default_services = config.default_services,
            "configuration loaded"
        );
        Ok(config)
    }
}

/// Reference to an engine to link at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRef {
    /// Engine component name.
    pub name: String,

    /// Engine component version.
    #[serde(default)]
    pub ver: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error), overridable by
    /// `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Event formatting style.
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

/// Log event formatting style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One-line compact output.
    #[default]
    Compact,
    /// Standard multi-field output.
    Full,
    /// Multi-line human-oriented output.
    Pretty,
}

fn default_default_services() -> bool {
    true
}

fn default_max_message_size() -> usize {
    crate::dispatch::MESSAGE_SIZE_MAX
}

fn default_group() -> String {
    "conclave".to_string()
}

fn default_nodeid() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = ExecConfig::from_figment(Figment::from(Serialized::defaults(
            ExecConfig::default(),
        )))
        .unwrap();

        assert!(config.default_services);
        assert!(config.engines.is_empty());
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert_eq!(config.group, "conclave");
        assert_eq!(config.nodeid, 1);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn toml_layer_overrides_defaults() {
        let figment = Figment::from(Serialized::defaults(ExecConfig::default())).merge(
            Toml::string(
                r#"
                default_services = false
                group = "testers"
                nodeid = 9

                [logging]
                level = "debug"
                format = "pretty"

                [[engines]]
                name = "conclave_probe"
                ver = 2
                "#,
            ),
        );
        let config = ExecConfig::from_figment(figment).unwrap();

        assert!(!config.default_services);
        assert_eq!(config.group, "testers");
        assert_eq!(config.nodeid, 9);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.engines.len(), 1);
        assert_eq!(config.engines[0].name, "conclave_probe");
        assert_eq!(config.engines[0].ver, 2);
    }
}
