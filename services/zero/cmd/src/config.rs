//! Configuration handling for the Zero server.
//!
//! Settings come from a YAML file and are then overridden by `ZERO_*`
//! environment variables.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use zero_engine::EngineConfig;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// How often traffic counters are logged, e.g. "30s"; "0s" disables it
    pub stats_interval: String,
    /// LZ4-compress TCP frames above `engine.compression_threshold`
    pub compression: bool,
    /// Engine settings
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_interval: "30s".to_string(),
            compression: false,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<Self>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides(|key| std::env::var(key).ok());

        info!(
            "Final configuration: bind={}, tcp={:?}, udp={:?}, readers={}, writers={}",
            config.engine.bind_address,
            config.engine.tcp_ports,
            config.engine.udp_ports,
            config.engine.reader_workers,
            config.engine.writer_workers
        );
        Ok(config)
    }

    /// Parsed stats interval, `None` when logging is disabled
    pub fn stats_interval(&self) -> Result<Option<Duration>> {
        let interval: Duration = match self.stats_interval.parse::<humantime::Duration>() {
            Ok(interval) => interval.into(),
            Err(e) => bail!("invalid stats_interval {:?}: {}", self.stats_interval, e),
        };
        Ok((!interval.is_zero()).then_some(interval))
    }

    /// Apply overrides read through `lookup`
    fn apply_environment_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ZERO_BIND_ADDRESS") {
            match value.parse() {
                Ok(addr) => {
                    self.engine.bind_address = addr;
                    info!("Bind address overridden by environment: {}", addr);
                }
                Err(_) => warn!("Ignoring invalid ZERO_BIND_ADDRESS {:?}", value),
            }
        }

        if let Some(value) = lookup("ZERO_TCP_PORTS") {
            match parse_ports(&value) {
                Some(ports) => {
                    info!("TCP ports overridden by environment: {:?}", ports);
                    self.engine.tcp_ports = ports;
                }
                None => warn!("Ignoring invalid ZERO_TCP_PORTS {:?}", value),
            }
        }

        if let Some(value) = lookup("ZERO_UDP_PORTS") {
            match parse_ports(&value) {
                Some(ports) => {
                    info!("UDP ports overridden by environment: {:?}", ports);
                    self.engine.udp_ports = ports;
                }
                None => warn!("Ignoring invalid ZERO_UDP_PORTS {:?}", value),
            }
        }

        if let Some(workers) = lookup("ZERO_READER_WORKERS").and_then(|v| v.parse().ok()) {
            self.engine.reader_workers = workers;
            info!("Reader workers overridden by environment: {}", workers);
        }

        if let Some(workers) = lookup("ZERO_WRITER_WORKERS").and_then(|v| v.parse().ok()) {
            self.engine.writer_workers = workers;
            info!("Writer workers overridden by environment: {}", workers);
        }

        if let Some(capacity) = lookup("ZERO_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
            self.engine.queue_capacity = capacity;
            info!("Queue capacity overridden by environment: {}", capacity);
        }

        if let Some(level) = lookup("ZERO_LOG_LEVEL") {
            info!("Log level overridden by environment: {}", level);
            self.log_level = level;
        }
    }
}

/// Comma separated port list; an empty string means no ports
fn parse_ports(value: &str) -> Option<Vec<u16>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.engine.tcp_ports, vec![8032]);
        assert_eq!(config.stats_interval().unwrap(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
log_level: debug
stats_interval: 5s
compression: true
engine:
  bind_address: 127.0.0.1
  tcp_ports: [9000, 9001]
  udp_ports: [9002]
  reader_workers: 4
  overflow_policy: drop_oldest
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ServerConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.stats_interval().unwrap(), Some(Duration::from_secs(5)));
        assert!(config.compression);
        assert_eq!(config.engine.tcp_ports, vec![9000, 9001]);
        assert_eq!(config.engine.udp_ports, vec![9002]);
        assert_eq!(config.engine.reader_workers, 4);
        assert_eq!(config.engine.writer_workers, 2);
        assert_eq!(
            config.engine.overflow_policy,
            zero_session::OverflowPolicy::DropOldest
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ServerConfig::load_from_file("/nonexistent/zero.yaml").unwrap();
        assert_eq!(config.engine.reader_workers, 2);
    }

    #[test]
    fn test_unparsable_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"engine: [not, a, map").unwrap();

        let config = ServerConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("ZERO_BIND_ADDRESS", "10.0.0.5"),
            ("ZERO_TCP_PORTS", "7000, 7001"),
            ("ZERO_UDP_PORTS", ""),
            ("ZERO_READER_WORKERS", "8"),
            ("ZERO_WRITER_WORKERS", "nope"),
            ("ZERO_QUEUE_CAPACITY", "64"),
            ("ZERO_LOG_LEVEL", "trace"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config.engine.udp_ports = vec![1234];
        config.apply_environment_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.engine.bind_address.to_string(), "10.0.0.5");
        assert_eq!(config.engine.tcp_ports, vec![7000, 7001]);
        assert!(config.engine.udp_ports.is_empty());
        assert_eq!(config.engine.reader_workers, 8);
        assert_eq!(config.engine.writer_workers, 2);
        assert_eq!(config.engine.queue_capacity, 64);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_stats_interval_disabled_and_invalid() {
        let mut config = ServerConfig {
            stats_interval: "0s".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(config.stats_interval().unwrap(), None);

        config.stats_interval = "soon".to_string();
        assert!(config.stats_interval().is_err());
    }
}
