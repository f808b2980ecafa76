// ============================================
// File: crates/nextun-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! Defines the seams between the channel pool, the data channel
//! listeners it supervises and the server that owns user state, so each
//! side can be replaced by an in-memory fake in tests.
//!
//! ## Main Functionality
//! - `DataChannelListener`: one listening endpoint on one port
//! - `ListenerFactory`: creates listeners on demand for the pool
//! - `ChannelHost`: what a listener asks of the server
//! - `TunDevice`: virtual interface read/write interface
//! - `TunConfig`: virtual interface parameters
//!
//! ## ⚠️ Important Note for Next Developer
//! - All traits are `Send + Sync`; listeners are shared behind `Arc`
//! - `serve` returning is the ONLY signal the pool gets that a listener
//!   is gone. Never return early on a per-connection error
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};

use nextun_common::ip::{Ip, IpNet};
use nextun_common::scope::Scope;
use nextun_common::types::UserId;

use crate::error::{Result, TransportError};

// ============================================
// Data Channel Traits
// ============================================

/// A listening data channel endpoint.
///
/// # Lifecycle
/// ```text
/// create() ──► port() known ──► serve() runs ──► serve() returns
///                                  │                    │
///                                  │ accepts clients    └─► slot freed
///                                  ▼
///                           per-connection tasks
/// ```
#[async_trait]
pub trait DataChannelListener: Send + Sync + 'static {
    /// The port this listener accepts connections on.
    fn port(&self) -> u16;

    /// Runs the accept loop until the listener fails or its scope is
    /// cancelled.
    async fn serve(self: Arc<Self>);
}

/// Creates data channel listeners for the channel pool.
#[async_trait]
pub trait ListenerFactory: Send + Sync + 'static {
    /// Listener type produced by this factory.
    type Listener: DataChannelListener;

    /// Creates a listener bound to a fresh port.
    ///
    /// The listener observes `scope` for cancellation.
    ///
    /// # Errors
    /// Returns error if no endpoint could be bound.
    async fn create(&self, scope: &Scope) -> Result<Arc<Self::Listener>>;
}

#[async_trait]
impl<F: ListenerFactory> ListenerFactory for Arc<F> {
    type Listener = F::Listener;

    async fn create(&self, scope: &Scope) -> Result<Arc<Self::Listener>> {
        (**self).create(scope).await
    }
}

// ============================================
// ChannelHost
// ============================================

/// Receiving half of a user's to-client queue, shared by every data
/// channel the user is connected on.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<Bytes>>>;

/// The two queues that connect a user's data channel connections to
/// the server.
#[derive(Clone)]
pub struct UserChannel {
    /// Packets the client sent, towards the server.
    pub from_client: mpsc::Sender<Bytes>,
    /// Packets for the client, drained by whichever channel polls first.
    pub to_client: SharedReceiver,
}

impl std::fmt::Debug for UserChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserChannel")
            .field("from_client_closed", &self.from_client.is_closed())
            .finish_non_exhaustive()
    }
}

/// Server-side services a data channel listener depends on.
pub trait ChannelHost: Send + Sync + 'static {
    /// Resolves the queues of a logged-in user.
    ///
    /// # Errors
    /// Returns `UnknownUser` if nobody with this id is logged in.
    fn user_channel(&self, user: UserId) -> Result<UserChannel>;

    /// Subscribes to the set of active data channel ports.
    fn topology(&self) -> watch::Receiver<Vec<u16>>;
}

// ============================================
// TunDevice Trait
// ============================================

/// Abstract interface for virtual interface operations.
///
/// # Data Format
/// Data read from and written to the device is raw IPv4 packets
/// (no Ethernet headers).
#[async_trait]
pub trait TunDevice: Send + Sync {
    /// Reads one IP packet from the device.
    ///
    /// # Errors
    /// Returns error if read fails
    async fn read(&self) -> Result<Bytes>;

    /// Writes one IP packet to the device.
    ///
    /// # Errors
    /// Returns error if write fails
    async fn write(&self, packet: Bytes) -> Result<()>;

    /// Returns the device name.
    fn name(&self) -> &str;

    /// Returns the MTU (Maximum Transmission Unit).
    fn mtu(&self) -> u16;

    /// Returns the device's assigned address (the VPN gateway).
    fn ip_addr(&self) -> Ip;

    /// Returns the network mask.
    fn netmask(&self) -> Ip;

    /// Brings the device up.
    ///
    /// # Errors
    /// Returns error if activation fails
    async fn up(&self) -> Result<()>;

    /// Brings the device down.
    ///
    /// # Errors
    /// Returns error if deactivation fails
    async fn down(&self) -> Result<()>;

    /// Returns `true` if the device is up.
    fn is_up(&self) -> bool;
}

// ============================================
// TunConfig
// ============================================

/// Configuration for virtual interface creation.
///
/// # Example
/// ```
/// use nextun_transport::traits::TunConfig;
///
/// let config = TunConfig::new("nextun0")
///     .with_network("10.8.0.1/24".parse().unwrap())
///     .with_mtu(1400);
/// assert_eq!(config.address.to_string(), "10.8.0.1");
/// assert_eq!(config.netmask.to_string(), "255.255.255.0");
/// ```
#[derive(Debug, Clone)]
pub struct TunConfig {
    /// Device name (e.g., "tun0", "nextun0").
    pub name: String,
    /// Address assigned to the device.
    pub address: Ip,
    /// Network mask.
    pub netmask: Ip,
    /// MTU size.
    pub mtu: u16,
}

impl TunConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: Ip::new(10, 8, 0, 1),
            netmask: Ip::new(255, 255, 255, 0),
            mtu: 1400,
        }
    }

    /// Takes address and mask from a CIDR whose host part is the gateway.
    #[must_use]
    pub fn with_network(mut self, net: IpNet) -> Self {
        self.address = net.ip();
        self.netmask = net.mask();
        self
    }

    /// Sets the MTU.
    #[must_use]
    pub const fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns error if configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TransportError::invalid_config(
                "name",
                "device name cannot be empty",
            ));
        }

        if self.name.len() > 15 {
            return Err(TransportError::invalid_config(
                "name",
                "device name cannot exceed 15 characters",
            ));
        }

        if self.mtu < 576 {
            return Err(TransportError::invalid_config(
                "mtu",
                "MTU must be at least 576 bytes",
            ));
        }

        if self.mtu > 9000 {
            return Err(TransportError::invalid_config(
                "mtu",
                "MTU cannot exceed 9000 bytes",
            ));
        }

        Ok(())
    }
}

impl Default for TunConfig {
    fn default() -> Self {
        Self::new("nextun0")
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tun_config_defaults() {
        let config = TunConfig::default();

        assert_eq!(config.name, "nextun0");
        assert_eq!(config.address, Ip::new(10, 8, 0, 1));
        assert_eq!(config.mtu, 1400);
    }

    #[test]
    fn test_tun_config_from_network() {
        let config = TunConfig::new("test0").with_network("172.16.5.9/16".parse().unwrap());

        assert_eq!(config.address, Ip::new(172, 16, 5, 9));
        assert_eq!(config.netmask, Ip::new(255, 255, 0, 0));
    }

    #[test]
    fn test_tun_config_validation() {
        assert!(TunConfig::new("tun0").validate().is_ok());
        assert!(TunConfig::new("").validate().is_err());
        assert!(TunConfig::new("a".repeat(20)).validate().is_err());
        assert!(TunConfig::new("tun0").with_mtu(100).validate().is_err());
        assert!(TunConfig::new("tun0").with_mtu(10000).validate().is_err());
    }

    #[tokio::test]
    async fn test_user_channel_shares_receiver() {
        let (from_client, _inbound) = mpsc::channel(4);
        let (to_client_tx, to_client_rx) = mpsc::channel(4);
        let channel = UserChannel {
            from_client,
            to_client: Arc::new(Mutex::new(to_client_rx)),
        };
        let other = channel.clone();

        to_client_tx.send(Bytes::from_static(b"a")).await.unwrap();
        to_client_tx.send(Bytes::from_static(b"b")).await.unwrap();

        let first = channel.to_client.lock().await.recv().await.unwrap();
        let second = other.to_client.lock().await.recv().await.unwrap();
        assert_eq!(first, Bytes::from_static(b"a"));
        assert_eq!(second, Bytes::from_static(b"b"));
    }
}
