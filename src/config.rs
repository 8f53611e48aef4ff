//! Configuration for bridge nodes
//!
//! Plain key-value configuration loaded from a TOML file, with defaults
//! for every field so a node runs with no file at all. Per-end settings
//! cover the default IP, the default port (0 = auto-assign a free port)
//! and the command prelude evaluated before any submitted command.

use std::fs;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::role::Role;

/// Main node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Settings for the NEURON end
    pub neuron: EndSettings,

    /// Settings for the Blender end
    pub blender: EndSettings,

    /// Address registry settings
    pub registry: RegistrySettings,

    /// RPC client/server tuning
    pub rpc: RpcSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Per-end settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndSettings {
    /// IP address this end binds to (and peers dial when static)
    pub ip: String,

    /// Port (0 = auto-assign a free port at server start)
    pub port: u16,

    /// Statements evaluated before every submitted command
    pub prelude: String,
}

impl Default for EndSettings {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 0,
            prelude: String::new(),
        }
    }
}

impl EndSettings {
    /// A non-default ip plus an explicit port means "dial this address
    /// directly, skip the registry" (cross-machine use)
    pub fn static_address(&self) -> Option<String> {
        if self.ip != "127.0.0.1" && self.port != 0 {
            Some(format!("tcp://{}:{}", self.ip, self.port))
        } else {
            None
        }
    }
}

/// Address registry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Directory for address files (empty = OS temp dir)
    pub dir: Option<String>,
}

/// RPC tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    /// Timeout for establishing a TCP connection to a peer (ms)
    pub connect_timeout_ms: u64,

    /// Interval between task status polls in `run_command` (ms)
    pub poll_interval_ms: u64,

    /// Sleep between drain-loop passes when the queue is empty (ms)
    pub drain_idle_ms: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            poll_interval_ms: 100,
            drain_idle_ms: 100,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json_format: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)?;
                let config: NodeConfig =
                    toml::from_str(&text).map_err(|source| Error::ConfigParse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                debug!(path = %path.display(), "Configuration loaded");
                config
            }
            None => NodeConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate field values
    pub fn validate(&self) -> Result<()> {
        for (name, end) in [("neuron", &self.neuron), ("blender", &self.blender)] {
            end.ip.parse::<IpAddr>().map_err(|_| {
                Error::ConfigValidation(format!("{name}.ip is not a valid IP: '{}'", end.ip))
            })?;
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "warning" | "error" => {}
            other => {
                return Err(Error::ConfigValidation(format!(
                    "logging.level '{other}' is not one of trace/debug/info/warn/error"
                )))
            }
        }

        if self.rpc.poll_interval_ms == 0 || self.rpc.drain_idle_ms == 0 {
            return Err(Error::ConfigValidation(
                "rpc.poll_interval_ms and rpc.drain_idle_ms must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Settings for a logical end. Control roles resolve to the end they
    /// would serve, which is also the end whose prelude applies.
    pub fn end(&self, role: Role) -> &EndSettings {
        match role.base_end() {
            Role::Neuron => &self.neuron,
            Role::Blender => &self.blender,
            _ => unreachable!("base_end always resolves to a serving end"),
        }
    }

    /// Render the configuration as TOML (used by `config show` / `init`)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("Failed to serialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.neuron.ip, "127.0.0.1");
        assert_eq!(config.neuron.port, 0);
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        let config = NodeConfig::load(None).unwrap();
        assert_eq!(config.rpc.poll_interval_ms, 100);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[neuron]
ip = "127.0.0.1"
port = 7001
prelude = "dt = 0.025"

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.neuron.port, 7001);
        assert_eq!(config.neuron.prelude, "dt = 0.025");
        assert_eq!(config.logging.level, "debug");
        // Untouched sections keep defaults
        assert_eq!(config.blender.port, 0);
    }

    #[test]
    fn test_invalid_ip_rejected() {
        let config = NodeConfig {
            neuron: EndSettings {
                ip: "not-an-ip".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_static_address() {
        let end = EndSettings::default();
        assert!(end.static_address().is_none());

        let end = EndSettings {
            ip: "192.168.1.20".to_string(),
            port: 7000,
            prelude: String::new(),
        };
        assert_eq!(
            end.static_address().as_deref(),
            Some("tcp://192.168.1.20:7000")
        );
    }

    #[test]
    fn test_end_lookup_for_control_roles() {
        let mut config = NodeConfig::default();
        config.blender.port = 7100;
        assert_eq!(config.end(Role::ControlBlender).port, 7100);
        assert_eq!(config.end(Role::Neuron).port, 0);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = NodeConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.neuron.ip, config.neuron.ip);
    }
}
