//! Replica Server Configuration
//!
//! Loads the dedicated server's options from `serveroptions.txt`.
//!
//! The file is a list of `key = value` lines; `#` starts a comment line.
//! Unknown keys are ignored and malformed values keep their default.
//!
//! ```text
//! name = Sandbox
//! bindip = 0.0.0.0
//! port = 7777
//! slots = 16
//! compression = zlib
//! executionmode = queued
//! verbosity = debug
//! tickrate = 20
//! pinginterval = 1000
//! handshaketimeout = 1000
//! ```

use replica_core::{ReplicaError, Result};
use replica_network::{ExecutionMode, NetworkConfig, Verbosity};
use replica_protocol::CompressionType;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Default location of the options file, relative to the working directory
pub const DEFAULT_OPTIONS_PATH: &str = "config/serveroptions.txt";

/// Dedicated server options
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    /// Server name (from "name" option)
    pub name: String,
    /// Listen address (from "bindip" option)
    pub bind_ip: IpAddr,
    /// Listen port (from "port" option, default: 7777)
    pub port: u16,
    /// Maximum simultaneous clients (from "slots" option)
    pub slots: usize,
    /// Frame compression (from "compression" option)
    pub compression: CompressionType,
    /// Where packets are handled (from "executionmode" option)
    pub execution_mode: ExecutionMode,
    /// Log verbosity (from "verbosity" option)
    pub verbosity: Verbosity,
    /// Frames per second (from "tickrate" option)
    pub tick_rate: u32,
    /// Ping period in milliseconds (from "pinginterval" option)
    pub ping_interval_ms: u64,
    /// Client handshake wait in milliseconds (from "handshaketimeout" option)
    pub handshake_timeout_ms: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: "Replica Server".into(),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 7777,
            slots: 32,
            compression: CompressionType::None,
            execution_mode: ExecutionMode::Queued,
            verbosity: Verbosity::Errors,
            tick_rate: 20,
            ping_interval_ms: 1000,
            handshake_timeout_ms: 1000,
        }
    }
}

impl ServerOptions {
    /// Load options from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        tracing::debug!("Loaded options from {}", path.as_ref().display());
        Ok(Self::parse(&content))
    }

    /// Load options from [`DEFAULT_OPTIONS_PATH`]
    pub fn load_default() -> Result<Self> {
        Self::load_from_file(DEFAULT_OPTIONS_PATH)
    }

    /// Parse serveroptions.txt content
    pub fn parse(content: &str) -> Self {
        let mut options = Self::default();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                options.parse_option(&key.trim().to_lowercase(), value.trim());
            }
        }

        options
    }

    fn parse_option(&mut self, key: &str, value: &str) {
        match key {
            "name" => self.name = value.into(),
            "bindip" => {
                self.bind_ip = value.parse().unwrap_or(self.bind_ip);
            }
            "port" => {
                self.port = value.parse().unwrap_or(self.port);
            }
            "slots" => {
                self.slots = value.parse().unwrap_or(self.slots);
            }
            "compression" => {
                self.compression = value.parse().unwrap_or(self.compression);
            }
            "executionmode" => {
                self.execution_mode = value.parse().unwrap_or(self.execution_mode);
            }
            "verbosity" => {
                self.verbosity = value.parse().unwrap_or(self.verbosity);
            }
            "tickrate" => {
                self.tick_rate = value.parse().unwrap_or(self.tick_rate);
            }
            "pinginterval" => {
                self.ping_interval_ms = value.parse().unwrap_or(self.ping_interval_ms);
            }
            "handshaketimeout" => {
                self.handshake_timeout_ms = value.parse().unwrap_or(self.handshake_timeout_ms);
            }
            _ => {
                tracing::debug!("Unknown option: {} = {}", key, value);
            }
        }
    }

    /// Check the options for values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.slots == 0 {
            return Err(ReplicaError::Config("slots must be > 0".into()));
        }
        if self.tick_rate == 0 {
            return Err(ReplicaError::Config("tickrate must be > 0".into()));
        }
        self.network_config().validate().map_err(ReplicaError::Config)
    }

    /// Address for the TCP listener
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Time between two frames
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    /// Network configuration derived from these options
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            execution_mode: self.execution_mode,
            compression: self.compression,
            verbosity: self.verbosity,
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            ..Default::default()
        }
    }

    /// Display configuration summary
    pub fn display(&self) {
        tracing::info!("Server Configuration:");
        tracing::info!("    Name: {}", self.name);
        tracing::info!("    Bind: {}", self.bind_address());
        tracing::info!("    Slots: {}", self.slots);
        tracing::info!("    Compression: {}", self.compression);
        tracing::info!("    Execution mode: {}", self.execution_mode);
        tracing::info!("    Tick rate: {} Hz", self.tick_rate);
        tracing::info!("    Ping interval: {} ms", self.ping_interval_ms);
    }
}
