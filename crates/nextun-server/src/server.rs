// ============================================
// File: crates/nextun-server/src/server.rs
// ============================================
//! # Server Orchestrator
//!
//! ## Creation Reason
//! Wires the channel pool, address pool, user store and controller
//! group together and manages the server lifecycle.
//!
//! ## Main Functionality
//! - `Server`: construction, `run`, `shutdown`
//! - Session open/close: address, user, route and pump as one unit
//! - `ChannelHost` impl handed to every data channel listener
//!
//! ## Server Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Server                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  open_session ──► AddressPool ──► UserStore ──► Controller  │
//! │                                                             │
//! │  ┌─────────────────┐      ┌─────────────────────────────┐  │
//! │  │  ChannelPool    │      │  ControllerGroup            │  │
//! │  │  TCP listeners  │─────►│  topology watch             │  │
//! │  │  (N ports)      │      │  pumps + delivery loop      │  │
//! │  └────────┬────────┘      └──────────────┬──────────────┘  │
//! │           │ Hello(user)                  │                  │
//! │           ▼                              ▼                  │
//! │     ServerHost::user_channel        TUN device              │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every task runs on the server scope; `shutdown` cancels it and
//!   `run` waits for all of them before returning
//! - `open_session` picks the port before allocating anything, so a
//!   server with no channels yet rejects logins without side effects
//!
//! ## Last Modified
//! v0.1.0 - Initial server implementation

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};

use nextun_common::ip::{Ip, IpNet};
use nextun_common::scope::Scope;
use nextun_common::types::UserId;
use nextun_transport::traits::{ChannelHost, TunConfig as DeviceConfig, TunDevice, UserChannel};
use nextun_transport::{TcpListenerFactory, TransportError};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::services::{
    AddressPool, ChannelDelegate, ChannelPool, ControllerGroup, RoutingService, UserStore,
};

/// How long `run` waits for tasks after shutdown is requested.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// SessionGrant
// ============================================

/// Everything a client needs after logging in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionGrant {
    /// Id to send in the data channel `Hello` frame.
    pub user_id: UserId,
    /// Virtual address assigned to the client.
    pub address: Ip,
    /// The VPN network; its host part is the gateway.
    pub network: IpNet,
    /// Interface MTU.
    pub mtu: u16,
    /// Data channel port to connect to.
    pub port: u16,
}

// ============================================
// ServerHost
// ============================================

/// What data channel listeners see of the server.
struct ServerHost {
    users: Arc<UserStore>,
    controller: Arc<ControllerGroup>,
}

impl ChannelHost for ServerHost {
    fn user_channel(&self, user: UserId) -> nextun_transport::Result<UserChannel> {
        self.users
            .find(user)
            .map(|u| u.channel())
            .ok_or(TransportError::unknown_user(user))
    }

    fn topology(&self) -> watch::Receiver<Vec<u16>> {
        self.controller.subscribe_topology()
    }
}

// ============================================
// Server
// ============================================

/// Main tunnel server.
///
/// # Lifecycle
/// 1. Create with `Server::new(config, tun)`
/// 2. Start with `server.run().await`
/// 3. Shutdown via `server.shutdown()` or Ctrl+C
pub struct Server {
    config: ServerConfig,
    scope: Scope,
    addresses: AddressPool,
    users: Arc<UserStore>,
    controller: Arc<ControllerGroup>,
    pool: Arc<ChannelPool<TcpListenerFactory>>,
    tun: Arc<dyn TunDevice>,
}

impl Server {
    /// Creates a server on top of `tun`. Nothing is bound until
    /// [`run`](Self::run).
    ///
    /// # Errors
    /// Returns `ConfigInvalid` if the configuration fails validation.
    pub fn new(config: ServerConfig, tun: Arc<dyn TunDevice>) -> Result<Self> {
        config.validate()?;

        let scope = Scope::new();
        let addresses = AddressPool::new(config.vpn.net)?;
        let users = Arc::new(UserStore::new(
            config.limits.max_users,
            config.limits.queue_depth,
        ));
        let routing = Arc::new(RoutingService::new());
        let controller = Arc::new(ControllerGroup::new(
            scope.clone(),
            Arc::clone(&users),
            routing,
            Arc::clone(&tun),
        ));

        let host = Arc::new(ServerHost {
            users: Arc::clone(&users),
            controller: Arc::clone(&controller),
        });
        let factory = TcpListenerFactory::new(config.network.bind_addr, host)
            .with_hello_timeout(config.channels.hello_timeout());
        let delegate: Arc<dyn ChannelDelegate> = controller.clone();
        let pool = Arc::new(
            ChannelPool::new(factory, delegate, scope.clone())
                .with_retry_delay(config.channels.retry_delay()),
        );

        info!(
            network = %config.vpn.net,
            capacity = addresses.capacity(),
            max_users = config.limits.max_users,
            "Services initialized"
        );

        Ok(Self {
            config,
            scope,
            addresses,
            users,
            controller,
            pool,
            tun,
        })
    }

    /// Interface parameters matching `config`.
    #[must_use]
    pub fn device_config(config: &ServerConfig) -> DeviceConfig {
        DeviceConfig::new(config.tun.device_name.clone())
            .with_network(config.vpn.net)
            .with_mtu(config.tun.mtu)
    }

    /// Runs the server until shutdown.
    ///
    /// # Errors
    /// - `StartupFailed` if the interface cannot be brought up
    /// - the interface error that stopped packet delivery
    pub async fn run(&self) -> Result<()> {
        info!("Starting nextun server v{}", env!("CARGO_PKG_VERSION"));

        self.tun
            .up()
            .await
            .map_err(|e| ServerError::startup_failed(format!("TUN activation failed: {e}")))?;
        info!(device = self.tun.name(), gateway = %self.gateway(), mtu = self.tun.mtu(), "TUN device up");

        let pool = Arc::clone(&self.pool);
        let target = self.config.channels.count;
        self.scope.spawn(async move { pool.run(target).await });

        let failure = Arc::new(Mutex::new(None));
        let controller = Arc::clone(&self.controller);
        let scope = self.scope.clone();
        let delivery_failure = Arc::clone(&failure);
        self.scope.spawn(async move {
            if let Err(e) = controller.run_delivery().await {
                *delivery_failure.lock() = Some(e);
                scope.cancel();
            }
        });

        info!(channels = target, "Server started successfully");

        tokio::select! {
            () = self.scope.cancelled() => info!("Shutdown requested"),
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                    self.scope.cancelled().await;
                }
            },
        }

        info!("Shutting down server...");
        self.scope.cancel();

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.scope.wait())
            .await
            .is_err()
        {
            warn!(outstanding = self.scope.outstanding(), "Tasks timed out during shutdown");
        }

        if let Err(e) = self.tun.down().await {
            warn!(error = %e, "TUN shutdown error");
        }

        if let Some(e) = failure.lock().take() {
            error!(error = %e, "Server stopped after delivery failure");
            return Err(e);
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Triggers server shutdown programmatically.
    pub fn shutdown(&self) {
        self.scope.cancel();
    }

    // ===== Sessions =====

    /// Logs a user in: allocates an address, registers the user, starts
    /// forwarding and picks a data channel for them.
    ///
    /// # Errors
    /// - `ShuttingDown` once shutdown has started
    /// - `NoChannelAvailable` if no data channel is running
    /// - `AddressPoolExhausted` or `UserLimitReached` when full
    pub fn open_session(&self, name: &str) -> Result<SessionGrant> {
        if self.scope.is_cancelled() {
            return Err(ServerError::ShuttingDown);
        }
        let port = self.data_channel()?;
        let address = self.addresses.allocate()?;

        let user = match self.users.register(name, address) {
            Ok(user) => user,
            Err(e) => {
                self.addresses.release(address);
                return Err(e);
            }
        };

        if let Err(e) = self.controller.user_login(Arc::clone(&user)) {
            self.users.remove(user.id);
            self.addresses.release(address);
            return Err(e);
        }

        Ok(SessionGrant {
            user_id: user.id,
            address,
            network: self.config.vpn.net,
            mtu: self.mtu(),
            port,
        })
    }

    /// Logs a user out and frees their address.
    ///
    /// # Errors
    /// Returns `UserNotFound` if the user is not logged in.
    pub fn close_session(&self, id: UserId) -> Result<()> {
        let user = self.users.remove(id).ok_or(ServerError::UserNotFound(id))?;
        self.controller.user_logout(id);
        self.addresses.release(user.address);
        Ok(())
    }

    // ===== Queries =====

    /// Gateway address of the VPN network.
    #[must_use]
    pub fn gateway(&self) -> Ip {
        self.config.vpn.gateway()
    }

    /// Interface MTU.
    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.tun.mtu()
    }

    /// A random active data channel port.
    ///
    /// # Errors
    /// Returns `NoChannelAvailable` if no data channel is running.
    pub fn data_channel(&self) -> Result<u16> {
        self.pool
            .one_active_port()
            .ok_or(ServerError::NoChannelAvailable)
    }

    /// Every active data channel port.
    #[must_use]
    pub fn all_data_channels(&self) -> Vec<u16> {
        self.pool.active_ports()
    }

    /// Number of logged-in users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.count()
    }

    /// Number of addresses still free.
    #[must_use]
    pub fn available_addresses(&self) -> usize {
        self.addresses.available_count()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("bind_addr", &self.config.network.bind_addr)
            .field("network", &self.config.vpn.net)
            .field("tun_device", &self.tun.name())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
