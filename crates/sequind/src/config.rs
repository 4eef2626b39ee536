//! TOML configuration for the Sequin daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node identity and data directory.
    pub node: NodeSection,
    /// Epoch timing.
    pub sequencer: SequencerSection,
    /// Map and log tree access.
    pub trees: TreesSection,
    /// Admin HTTP API.
    pub admin: AdminSection,
    /// Logging configuration.
    pub log: LogSection,
    /// OTLP telemetry export.
    pub telemetry: TelemetrySection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for persistent data (node key).
    pub data_dir: PathBuf,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|home| home.join(".sequin"))
            .unwrap_or_else(|| PathBuf::from(".sequin"));
        Self { data_dir }
    }
}

/// `[sequencer]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SequencerSection {
    /// Tick interval in milliseconds; also the per-epoch deadline.
    pub min_interval_ms: u64,
    /// Maximum milliseconds between epochs before one is forced.
    pub max_interval_ms: u64,
}

impl Default for SequencerSection {
    fn default() -> Self {
        Self {
            min_interval_ms: 5_000,
            max_interval_ms: 300_000,
        }
    }
}

/// `[trees]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TreesSection {
    /// `"memory"` (in-process trees) or `"remote"` (QUIC tree service).
    pub mode: String,
    /// Identifier of the map tree.
    pub map_id: i64,
    /// Identifier of the log tree.
    pub log_id: i64,
    /// Tree service endpoint for remote mode
    /// (`"<endpoint_id>"` or `"<endpoint_id>@host:port"`).
    pub endpoint: Option<String>,
}

impl Default for TreesSection {
    fn default() -> Self {
        Self {
            mode: "memory".to_string(),
            map_id: 1,
            log_id: 2,
            endpoint: None,
        }
    }
}

/// `[admin]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AdminSection {
    /// Listen address for the admin HTTP API.
    pub listen_addr: String,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4860".to_string(),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[telemetry]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// OTLP collector endpoint. Empty disables export.
    pub otlp_endpoint: Option<String>,
    /// Custom OTLP headers in `key=value,key2=value2` format.
    pub otlp_headers: Option<String>,
    /// Service name reported in resource attributes.
    pub service_name: Option<String>,
}

impl CliConfig {
    /// Load config from a TOML file, or defaults if no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Effective tick interval.
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.sequencer.min_interval_ms)
    }

    /// Effective forced-epoch bound.
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.sequencer.max_interval_ms)
    }
}
