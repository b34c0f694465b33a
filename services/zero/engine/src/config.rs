//! Engine configuration.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use zero_session::{OverflowPolicy, SessionConfig, DEFAULT_MAX_CONNECTIONS_PER_IP};
use zero_wire::{DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_MAX_FRAME_SIZE};

/// Configuration for a [`ZeroEngine`](crate::ZeroEngine)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address every listener binds to
    pub bind_address: IpAddr,
    /// TCP ports to listen on
    pub tcp_ports: Vec<u16>,
    /// UDP ports to open
    pub udp_ports: Vec<u16>,
    /// Reader worker threads
    pub reader_workers: usize,
    /// Writer worker threads
    pub writer_workers: usize,
    /// Per-worker read buffer size in bytes
    pub read_buffer_size: usize,
    /// Largest inbound TCP frame in bytes
    pub max_frame_size: usize,
    /// Packet queue capacity per session
    pub queue_capacity: usize,
    /// Behaviour of a full packet queue
    pub overflow_policy: OverflowPolicy,
    /// Shed low-priority packets as queues fill
    pub priority_shedding: bool,
    /// Simultaneous TCP connections allowed per remote IP
    pub max_connections_per_ip: usize,
    /// Idle limit for sessions in milliseconds; 0 disables
    pub max_idle_ms: u64,
    /// Close sessions that never associate
    pub close_orphans: bool,
    /// Period of the idle/orphan sweep in milliseconds
    pub housekeeping_interval_ms: u64,
    /// Poll timeout of acceptor and reader loops in milliseconds
    pub poll_timeout_ms: u64,
    /// How long shutdown waits for worker threads in milliseconds
    pub shutdown_timeout_ms: u64,
    /// Payloads above this size go through the compressor, if one is installed
    pub compression_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_ports: vec![8032],
            udp_ports: Vec::new(),
            reader_workers: 2,
            writer_workers: 2,
            read_buffer_size: 64 * 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            queue_capacity: 1024,
            overflow_policy: OverflowPolicy::RejectNew,
            priority_shedding: true,
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
            max_idle_ms: 0,
            close_orphans: true,
            housekeeping_interval_ms: 1000,
            poll_timeout_ms: 100,
            shutdown_timeout_ms: 5000,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.reader_workers == 0 {
            return Err(EngineError::Config("reader_workers must be at least 1".into()));
        }
        if self.writer_workers == 0 {
            return Err(EngineError::Config("writer_workers must be at least 1".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(EngineError::Config("read_buffer_size must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::Config("queue_capacity must be positive".into()));
        }
        if self.tcp_ports.is_empty() && self.udp_ports.is_empty() {
            return Err(EngineError::Config("no TCP or UDP port configured".into()));
        }
        Ok(())
    }

    /// Socket address for a port on the bind address
    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.bind_address, port)
    }

    /// Idle limit
    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }

    /// Housekeeping period
    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms.max(1))
    }

    /// Poll timeout
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    /// Shutdown join timeout
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Session settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            queue_capacity: self.queue_capacity,
            overflow_policy: self.overflow_policy,
            max_frame_size: self.max_frame_size,
            max_idle: self.max_idle(),
            queue_policy: if self.priority_shedding {
                defaults.queue_policy
            } else {
                None
            },
            close_orphans: self.close_orphans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_addr(8032).port(), 8032);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = EngineConfig {
            writer_workers: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "tcp_ports: [9000, 9001]\noverflow_policy: drop_oldest\nmax_idle_ms: 250\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.tcp_ports, vec![9000, 9001]);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.reader_workers, 2);

        let session = config.session_config();
        assert_eq!(session.max_idle, Duration::from_millis(250));
        assert_eq!(session.overflow_policy, OverflowPolicy::DropOldest);
    }
}
