// ============================================
// File: crates/nextun-server/src/config.rs
// ============================================
//! # Server Configuration
//!
//! ## Creation Reason
//! Provides configuration management for the nextun server, loaded from
//! a TOML file with every section optional.
//!
//! ## Main Functionality
//! - `ServerConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Configuration validation
//!
//! ## Configuration Sections
//! - `network`: host the data channel listeners bind on
//! - `channels`: data channel pool size and retry behaviour
//! - `vpn`: server subnet, whose host part is the gateway
//! - `tun`: virtual interface settings
//! - `limits`: user and queue limits
//! - `logging`: Log level
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! bind_addr = "0.0.0.0"
//!
//! [channels]
//! count = 4
//! retry_delay_ms = 1000
//!
//! [vpn]
//! net = "10.8.0.1/24"
//!
//! [tun]
//! device_name = "nextun0"
//! mtu = 1400
//!
//! [limits]
//! max_users = 1000
//! queue_depth = 256
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require server restart
//! - Data channel ports are always ephemeral; there is no port setting
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use nextun_common::ip::{Ip, IpNet};

use crate::error::{Result, ServerError};

// ============================================
// ServerConfig
// ============================================

/// Main server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Data channel pool configuration.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// VPN configuration (server subnet).
    #[serde(default)]
    pub vpn: VpnConfig,

    /// Virtual interface configuration.
    #[serde(default)]
    pub tun: TunConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns error if the text cannot be parsed or validated.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        self.channels.validate()?;
        self.vpn.validate()?;
        self.tun.validate()?;
        self.limits.validate()?;
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Host the data channel listeners bind on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: Ip,
}

const fn default_bind_addr() -> Ip {
    Ip::UNSPECIFIED
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

// ============================================
// ChannelsConfig
// ============================================

/// Data channel pool configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Number of data channel listeners kept alive.
    #[serde(default = "default_channel_count")]
    pub count: usize,

    /// Delay before retrying a failed listener creation, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Time a new connection has to identify its user, in seconds.
    #[serde(default = "default_hello_timeout_secs")]
    pub hello_timeout_secs: u64,
}

const fn default_channel_count() -> usize {
    4
}

const fn default_retry_delay_ms() -> u64 {
    1000
}

const fn default_hello_timeout_secs() -> u64 {
    10
}

impl ChannelsConfig {
    fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(ServerError::config_invalid(
                "channels.count",
                "must be greater than 0",
            ));
        }

        if self.hello_timeout_secs == 0 {
            return Err(ServerError::config_invalid(
                "channels.hello_timeout_secs",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Returns the retry delay.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Returns the handshake timeout.
    #[must_use]
    pub const fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            count: default_channel_count(),
            retry_delay_ms: default_retry_delay_ms(),
            hello_timeout_secs: default_hello_timeout_secs(),
        }
    }
}

// ============================================
// VpnConfig
// ============================================

/// VPN configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnConfig {
    /// Server subnet in CIDR notation. The host part is the gateway.
    #[serde(default = "default_vpn_net")]
    pub net: IpNet,
}

const fn default_vpn_net() -> IpNet {
    IpNet::new_clamped(Ip::new(10, 8, 0, 1), 24)
}

impl VpnConfig {
    fn validate(&self) -> Result<()> {
        if self.net.prefix_len() > 30 {
            return Err(ServerError::config_invalid(
                "vpn.net",
                "prefix length must be at most 30 to leave room for clients",
            ));
        }

        let gateway = self.net.ip();
        if gateway == self.net.network() || gateway == self.net.broadcast() {
            return Err(ServerError::config_invalid(
                "vpn.net",
                "host part must be the gateway address, not the network or broadcast address",
            ));
        }

        Ok(())
    }

    /// Returns the gateway address.
    #[must_use]
    pub const fn gateway(&self) -> Ip {
        self.net.ip()
    }
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            net: default_vpn_net(),
        }
    }
}

// ============================================
// TunConfig
// ============================================

/// Virtual interface configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunConfig {
    /// Device name.
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// MTU size.
    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

fn default_device_name() -> String {
    "nextun0".to_string()
}

const fn default_mtu() -> u16 {
    1400
}

impl TunConfig {
    fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(ServerError::config_invalid(
                "tun.device_name",
                "cannot be empty",
            ));
        }

        if self.device_name.len() > 15 {
            return Err(ServerError::config_invalid(
                "tun.device_name",
                "cannot exceed 15 characters",
            ));
        }

        if self.mtu < 576 {
            return Err(ServerError::config_invalid("tun.mtu", "must be at least 576"));
        }

        if self.mtu > 9000 {
            return Err(ServerError::config_invalid("tun.mtu", "cannot exceed 9000"));
        }

        Ok(())
    }
}

impl Default for TunConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            mtu: default_mtu(),
        }
    }
}

// ============================================
// LimitsConfig
// ============================================

/// Resource limits configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrently logged-in users.
    #[serde(default = "default_max_users")]
    pub max_users: usize,

    /// Capacity of each per-user packet queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

const fn default_max_users() -> usize {
    1000
}

const fn default_queue_depth() -> usize {
    256
}

impl LimitsConfig {
    fn validate(&self) -> Result<()> {
        if self.max_users == 0 {
            return Err(ServerError::config_invalid(
                "limits.max_users",
                "must be greater than 0",
            ));
        }

        if self.queue_depth == 0 {
            return Err(ServerError::config_invalid(
                "limits.queue_depth",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_users: default_max_users(),
            queue_depth: default_queue_depth(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channels.count, 4);
        assert_eq!(config.channels.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.vpn.gateway(), Ip::new(10, 8, 0, 1));
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [network]
            bind_addr = "127.0.0.1"

            [channels]
            count = 2
            retry_delay_ms = 250

            [vpn]
            net = "172.20.0.1/16"

            [tun]
            device_name = "nextun1"
            mtu = 1280

            [limits]
            max_users = 10
            queue_depth = 32

            [logging]
            level = "debug"
        "#;

        let config = ServerConfig::from_str(toml).unwrap();
        assert_eq!(config.network.bind_addr, Ip::new(127, 0, 0, 1));
        assert_eq!(config.channels.count, 2);
        assert_eq!(config.channels.retry_delay(), Duration::from_millis(250));
        assert_eq!(config.vpn.net.prefix_len(), 16);
        assert_eq!(config.vpn.gateway(), Ip::new(172, 20, 0, 1));
        assert_eq!(config.tun.mtu, 1280);
        assert_eq!(config.limits.queue_depth, 32);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_str("").unwrap();
        assert_eq!(config.network.bind_addr, Ip::UNSPECIFIED);
        assert_eq!(config.tun.device_name, "nextun0");
    }

    #[test]
    fn test_rejects_bad_subnet() {
        let err = ServerConfig::from_str("[vpn]\nnet = \"10.8.0.0/24\"").unwrap_err();
        assert!(err.is_config_error());

        assert!(ServerConfig::from_str("[vpn]\nnet = \"10.8.0.1/31\"").is_err());
        assert!(ServerConfig::from_str("[vpn]\nnet = \"not-an-ip/24\"").is_err());
    }

    #[test]
    fn test_rejects_zero_limits() {
        assert!(ServerConfig::from_str("[channels]\ncount = 0").is_err());
        assert!(ServerConfig::from_str("[limits]\nqueue_depth = 0").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ServerConfig::default();
        let back = ServerConfig::from_str(&config.to_toml()).unwrap();
        assert_eq!(back.vpn.net, config.vpn.net);
        assert_eq!(back.channels.count, config.channels.count);
    }
}
