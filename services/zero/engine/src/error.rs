//! Engine error type.

use std::net::SocketAddr;
use thiserror::Error;

/// Engine startup and runtime failures
#[derive(Error, Debug)]
pub enum EngineError {
    /// A listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the listener was asked to bind
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// The configuration cannot be run
    #[error("invalid configuration: {0}")]
    Config(String),

    /// `start` was called twice
    #[error("engine already started")]
    AlreadyStarted,

    /// The engine was shut down
    #[error("engine not running")]
    NotRunning,

    /// A worker thread could not be spawned
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        /// Thread name, e.g. `zero-reader-0`
        name: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Poll or socket setup failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Engine result
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_bind_error_keeps_source() {
        let err = EngineError::Bind {
            addr: "127.0.0.1:8032".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:8032: in use");
        assert!(err.source().is_some());
    }
}
