//! # Network Configuration
//!
//! Process-wide knobs of the networking layer.
//!
//! # Example
//!
//! ```rust
//! use replica_network::{ExecutionMode, NetworkConfig};
//! use replica_protocol::CompressionType;
//! use std::time::Duration;
//!
//! let config = NetworkConfig {
//!     execution_mode: ExecutionMode::Queued,
//!     compression: CompressionType::Zlib,
//!     ping_interval: Duration::from_millis(500),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use replica_core::ReplicaError;
use replica_protocol::CompressionType;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

/// Where inbound packets are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Inline on the connection's receiver task
    Threaded,
    /// Queued and drained by [`Network::update`](crate::Network::update)
    /// on the thread driving the session
    #[default]
    Queued,
}

impl FromStr for ExecutionMode {
    type Err = ReplicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "threaded" | "multithreaded" => Ok(ExecutionMode::Threaded),
            "queued" | "singlethreaded" => Ok(ExecutionMode::Queued),
            other => Err(ReplicaError::Config(format!("unknown execution mode '{}'", other))),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Threaded => f.write_str("threaded"),
            ExecutionMode::Queued => f.write_str("queued"),
        }
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Silent,
    #[default]
    Errors,
    Debug,
}

impl Verbosity {
    /// Maximum tracing level for this verbosity
    pub fn level_filter(&self) -> LevelFilter {
        match self {
            Verbosity::Silent => LevelFilter::OFF,
            Verbosity::Errors => LevelFilter::ERROR,
            Verbosity::Debug => LevelFilter::DEBUG,
        }
    }
}

impl FromStr for Verbosity {
    type Err = ReplicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "silent" | "none" => Ok(Verbosity::Silent),
            "errors" | "error" => Ok(Verbosity::Errors),
            "debug" => Ok(Verbosity::Debug),
            other => Err(ReplicaError::Config(format!("unknown verbosity '{}'", other))),
        }
    }
}

/// Networking configuration
///
/// # Purpose
/// Shared by the dedicated server and clients of one session. Both ends
/// must agree on `compression`; everything else is local.
///
/// # Fields
///
/// - `execution_mode`: where packet handlers run
/// - `compression`: whole-frame compression algorithm
/// - `verbosity`: log level used by the binary's subscriber
/// - `handshake_timeout`: how long `connect` waits for the server handshake
/// - `handshake_poll_interval`: how often `connect` polls while waiting
/// - `ping_interval`: period of the server ping loop
/// - `connect_timeout`: TCP connect timeout
/// - `max_frame_size`: largest accepted frame body, bigger frames close the connection
/// - `worker_threads`: size of the runtime driving socket I/O
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub execution_mode: ExecutionMode,

    /// # Default
    /// `CompressionType::None`
    pub compression: CompressionType,

    pub verbosity: Verbosity,

    /// # Default
    /// 1 second
    pub handshake_timeout: Duration,

    /// # Default
    /// 5 milliseconds
    pub handshake_poll_interval: Duration,

    /// # Default
    /// 1 second
    pub ping_interval: Duration,

    /// # Default
    /// 5 seconds
    pub connect_timeout: Duration,

    /// # Default
    /// 16 MiB
    pub max_frame_size: usize,

    /// # Default
    /// 2 threads
    pub worker_threads: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Queued,
            compression: CompressionType::None,
            verbosity: Verbosity::Errors,
            handshake_timeout: Duration::from_secs(1),
            handshake_poll_interval: Duration::from_millis(5),
            ping_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            max_frame_size: 16 * 1024 * 1024,
            worker_threads: 2,
        }
    }
}

impl NetworkConfig {
    /// Validate the configuration
    ///
    /// # Returns
    /// `Ok(())` if configuration is valid, `Err(String)` otherwise
    ///
    /// # Checks
    /// - timeouts and intervals must be non-zero
    /// - `handshake_poll_interval` must not exceed `handshake_timeout`
    /// - `max_frame_size` must be at least 1 KiB
    /// - `worker_threads` must be > 0
    pub fn validate(&self) -> Result<(), String> {
        if self.handshake_timeout.is_zero() {
            return Err("handshake_timeout must be > 0".to_string());
        }

        if self.handshake_poll_interval.is_zero() || self.handshake_poll_interval > self.handshake_timeout {
            return Err("handshake_poll_interval must be > 0 and <= handshake_timeout".to_string());
        }

        if self.ping_interval.is_zero() {
            return Err("ping_interval must be > 0".to_string());
        }

        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0".to_string());
        }

        if self.max_frame_size < 1024 {
            return Err("max_frame_size must be >= 1024".to_string());
        }

        if self.worker_threads == 0 {
            return Err("worker_threads must be > 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        assert_eq!(config.execution_mode, ExecutionMode::Queued);
        assert_eq!(config.compression, CompressionType::None);
        assert_eq!(config.handshake_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_poll_interval() {
        let config = NetworkConfig {
            handshake_poll_interval: Duration::from_secs(2),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_worker_threads() {
        let mut config = NetworkConfig::default();
        config.worker_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_knobs() {
        assert_eq!("Threaded".parse::<ExecutionMode>().unwrap(), ExecutionMode::Threaded);
        assert_eq!("queued".parse::<ExecutionMode>().unwrap(), ExecutionMode::Queued);
        assert!("fibers".parse::<ExecutionMode>().is_err());

        assert_eq!("debug".parse::<Verbosity>().unwrap().level_filter(), LevelFilter::DEBUG);
        assert_eq!("silent".parse::<Verbosity>().unwrap().level_filter(), LevelFilter::OFF);
        assert!("loud".parse::<Verbosity>().is_err());
    }
}
