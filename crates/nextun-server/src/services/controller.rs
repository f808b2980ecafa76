// ============================================
// File: crates/nextun-server/src/services/controller.rs
// ============================================
//! # Controller Group
//!
//! ## Creation Reason
//! Moves packets between logged-in users and the virtual interface and
//! publishes the data channel topology.
//!
//! ## Main Functionality
//! - `user_login` / `user_logout`: per-user pump lifecycle and routes
//! - `run_delivery`: TUN → user queue loop
//! - `ChannelDelegate` impl: topology updates from the channel pool
//!
//! ## Task Layout
//! ```text
//!   server scope
//!   ├── delivery loop        tun.read() → route → user.try_deliver()
//!   ├── pump (user 1)        from_client.recv() → check → tun.write()
//!   ├── pump (user 2)        ...
//!   └── ...                  each pump runs on its own child scope
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Delivery never blocks on a slow user: a full queue drops the packet
//! - A pump keeps its `Arc<User>` alive; logout must cancel it or the
//!   user's to-client queue never closes
//!
//! ## Last Modified
//! v0.1.0 - Initial controller group

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use nextun_common::scope::Scope;
use nextun_common::types::UserId;
use nextun_transport::traits::TunDevice;

use crate::error::{Result, ServerError};
use crate::handlers::PacketHandler;
use crate::services::channel_pool::ChannelDelegate;
use crate::services::routing::RoutingService;
use crate::services::users::{User, UserStore};

/// Forwards packets for every logged-in user.
pub struct ControllerGroup {
    scope: Scope,
    routing: Arc<RoutingService>,
    handler: Arc<PacketHandler>,
    tun: Arc<dyn TunDevice>,
    topology: watch::Sender<Vec<u16>>,
    pumps: DashMap<UserId, Scope>,
}

impl ControllerGroup {
    /// Creates a controller group. Nothing runs until a user logs in or
    /// [`run_delivery`](Self::run_delivery) is started.
    #[must_use]
    pub fn new(
        scope: Scope,
        users: Arc<UserStore>,
        routing: Arc<RoutingService>,
        tun: Arc<dyn TunDevice>,
    ) -> Self {
        let handler = Arc::new(PacketHandler::new(users, Arc::clone(&routing)));
        let (topology, _) = watch::channel(Vec::new());

        Self {
            scope,
            routing,
            handler,
            tun,
            topology,
            pumps: DashMap::new(),
        }
    }

    // ===== Users =====

    /// Routes the user's address to them and starts their pump.
    ///
    /// # Errors
    /// Returns `Internal` if the user's queue was already taken by an
    /// earlier login.
    pub fn user_login(&self, user: Arc<User>) -> Result<()> {
        let rx = user
            .take_from_client()
            .ok_or_else(|| ServerError::internal(format!("user {} already logged in", user.id)))?;

        if let Some(previous) = self.routing.add_route(user.address, user.id) {
            warn!(address = %user.address, previous = %previous, user = %user.id, "Route taken over");
        }

        let pump_scope = self.scope.child();
        if let Some(stale) = self.pumps.insert(user.id, pump_scope.clone()) {
            stale.cancel();
        }

        info!(user = %user.id, address = %user.address, "User logged in");

        let handler = Arc::clone(&self.handler);
        let tun = Arc::clone(&self.tun);
        self.scope.spawn(pump(pump_scope, user, rx, handler, tun));
        Ok(())
    }

    /// Stops the user's pump and removes their routes.
    ///
    /// Returns `false` if the user was not logged in here.
    pub fn user_logout(&self, id: UserId) -> bool {
        let Some((_, pump_scope)) = self.pumps.remove(&id) else {
            debug!(user = %id, "Logout of unknown user ignored");
            return false;
        };

        pump_scope.cancel();
        let routes = self.routing.remove_user_routes(id);

        info!(user = %id, routes, "User logged out");
        true
    }

    /// Number of users with a running pump.
    #[must_use]
    pub fn logged_in_count(&self) -> usize {
        self.pumps.len()
    }

    // ===== Delivery =====

    /// Reads packets from the interface and queues each one for the
    /// user its destination routes to, until the scope is cancelled.
    ///
    /// Transient read errors are skipped.
    ///
    /// # Errors
    /// Returns the interface error that stopped the loop.
    pub async fn run_delivery(&self) -> Result<()> {
        let _work = self.scope.work();
        info!(device = self.tun.name(), "Delivery loop started");

        let result = loop {
            let packet = tokio::select! {
                () = self.scope.cancelled() => break Ok(()),
                read = self.tun.read() => match read.map_err(ServerError::from) {
                    Ok(packet) => packet,
                    Err(e) if e.is_retryable() => {
                        debug!(error = %e, "Transient TUN read error");
                        continue;
                    }
                    Err(e) => break Err(e),
                },
            };
            self.deliver(packet);
        };

        match &result {
            Ok(()) => info!("Delivery loop stopped"),
            Err(e) => warn!(error = %e, "Delivery loop failed"),
        }
        result
    }

    fn deliver(&self, packet: Bytes) {
        let user = match self.handler.route_tun_packet(&packet) {
            Ok(user) => user,
            Err(e) => {
                trace!(error = %e, len = packet.len(), "TUN packet dropped");
                return;
            }
        };

        if !user.try_deliver(packet) {
            debug!(user = %user.id, "User queue full, packet dropped");
        }
    }

    // ===== Topology =====

    /// Subscribes to the set of active data channel ports.
    #[must_use]
    pub fn subscribe_topology(&self) -> watch::Receiver<Vec<u16>> {
        self.topology.subscribe()
    }

    /// The last published set of active data channel ports.
    #[must_use]
    pub fn current_topology(&self) -> Vec<u16> {
        self.topology.borrow().clone()
    }
}

impl ChannelDelegate for ControllerGroup {
    fn on_channel_topology_update(&self, ports: &[u16]) {
        debug!(ports = ?ports, "Topology updated");
        self.topology.send_replace(ports.to_vec());
    }
}

impl std::fmt::Debug for ControllerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerGroup")
            .field("logged_in", &self.pumps.len())
            .field("device", &self.tun.name())
            .finish_non_exhaustive()
    }
}

/// Forwards one user's packets to the interface until cancelled.
async fn pump(
    scope: Scope,
    user: Arc<User>,
    mut rx: mpsc::Receiver<Bytes>,
    handler: Arc<PacketHandler>,
    tun: Arc<dyn TunDevice>,
) {
    loop {
        let packet = tokio::select! {
            () = scope.cancelled() => break,
            packet = rx.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        if let Err(e) = handler.check_client_packet(&user, &packet) {
            debug!(user = %user.id, error = %e, "Client packet rejected");
            continue;
        }

        if let Err(e) = tun.write(packet).await {
            user.stats.record_dropped();
            warn!(user = %user.id, error = %e, "TUN write failed");
        }
    }

    debug!(user = %user.id, "Pump stopped");
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use nextun_common::ip::Ip;
    use nextun_transport::error::TransportError;
    use nextun_transport::traits::TunConfig;
    use nextun_transport::tun::QueueTun;

    struct Fixture {
        scope: Scope,
        users: Arc<UserStore>,
        routing: Arc<RoutingService>,
        tun: Arc<QueueTun>,
        controller: Arc<ControllerGroup>,
    }

    fn fixture(queue_depth: usize) -> Fixture {
        let scope = Scope::new();
        let users = Arc::new(UserStore::new(10, queue_depth));
        let routing = Arc::new(RoutingService::new());
        let tun = Arc::new(QueueTun::new(TunConfig::default()));
        let controller = Arc::new(ControllerGroup::new(
            scope.clone(),
            Arc::clone(&users),
            Arc::clone(&routing),
            Arc::clone(&tun) as Arc<dyn TunDevice>,
        ));
        Fixture {
            scope,
            users,
            routing,
            tun,
            controller,
        }
    }

    fn ipv4_packet(src: Ip, dst: Ip) -> Bytes {
        let mut packet = vec![0u8; 24];
        packet[0] = 0x45;
        packet[12..16].copy_from_slice(&src.octets());
        packet[16..20].copy_from_slice(&dst.octets());
        Bytes::from(packet)
    }

    #[tokio::test]
    async fn test_client_packet_reaches_tun() {
        let f = fixture(8);
        let user = f.users.register("a", Ip::new(10, 8, 0, 2)).unwrap();
        f.controller.user_login(Arc::clone(&user)).unwrap();

        let packet = ipv4_packet(Ip::new(10, 8, 0, 2), Ip::new(1, 1, 1, 1));
        user.channel().from_client.send(packet.clone()).await.unwrap();

        let written = tokio::time::timeout(Duration::from_secs(1), f.tun.next_written())
            .await
            .unwrap();
        assert_eq!(written, packet);
        f.scope.cancel();
    }

    #[tokio::test]
    async fn test_spoofed_packet_not_written() {
        let f = fixture(8);
        let user = f.users.register("a", Ip::new(10, 8, 0, 2)).unwrap();
        f.controller.user_login(Arc::clone(&user)).unwrap();

        let tx = user.channel().from_client;
        tx.send(ipv4_packet(Ip::new(10, 8, 0, 9), Ip::new(1, 1, 1, 1)))
            .await
            .unwrap();
        let good = ipv4_packet(Ip::new(10, 8, 0, 2), Ip::new(1, 1, 1, 1));
        tx.send(good.clone()).await.unwrap();

        let written = tokio::time::timeout(Duration::from_secs(1), f.tun.next_written())
            .await
            .unwrap();
        assert_eq!(written, good);
        assert_eq!(user.stats.snapshot().spoofed_rejected, 1);
        f.scope.cancel();
    }

    #[tokio::test]
    async fn test_delivery_routes_to_user() {
        let f = fixture(8);
        let user = f.users.register("a", Ip::new(10, 8, 0, 2)).unwrap();
        f.controller.user_login(Arc::clone(&user)).unwrap();

        let controller = Arc::clone(&f.controller);
        let delivery = tokio::spawn(async move { controller.run_delivery().await });

        let packet = ipv4_packet(Ip::new(1, 1, 1, 1), Ip::new(10, 8, 0, 2));
        f.tun.inject(packet.clone()).unwrap();

        let channel = user.channel();
        let received = tokio::time::timeout(Duration::from_secs(1), async {
            channel.to_client.lock().await.recv().await
        })
        .await
        .unwrap();
        assert_eq!(received, Some(packet));

        f.scope.cancel();
        assert!(delivery.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_delivery_drops_when_queue_full() {
        let f = fixture(1);
        let user = f.users.register("a", Ip::new(10, 8, 0, 2)).unwrap();
        f.controller.user_login(Arc::clone(&user)).unwrap();

        f.tun
            .inject(ipv4_packet(Ip::new(1, 1, 1, 1), Ip::new(10, 8, 0, 2)))
            .unwrap();
        f.tun
            .inject(ipv4_packet(Ip::new(1, 1, 1, 1), Ip::new(10, 8, 0, 2)))
            .unwrap();

        let controller = Arc::clone(&f.controller);
        let delivery = tokio::spawn(async move { controller.run_delivery().await });

        tokio::time::timeout(Duration::from_secs(1), async {
            while f.tun.pending_read_count() > 0 || user.stats.snapshot().packets_dropped == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let stats = user.stats.snapshot();
        assert_eq!(stats.packets_tx, 1);
        assert_eq!(stats.packets_dropped, 1);

        f.scope.cancel();
        delivery.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_delivery_skips_transient_errors() {
        let f = fixture(8);
        let user = f.users.register("a", Ip::new(10, 8, 0, 2)).unwrap();
        f.controller.user_login(Arc::clone(&user)).unwrap();

        let interrupted = std::io::Error::from(std::io::ErrorKind::Interrupted);
        f.tun.inject_error(TransportError::from(interrupted)).unwrap();
        let packet = ipv4_packet(Ip::new(1, 1, 1, 1), Ip::new(10, 8, 0, 2));
        f.tun.inject(packet.clone()).unwrap();
        f.tun
            .inject_error(TransportError::TunReadFailed {
                reason: "device removed".into(),
            })
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), f.controller.run_delivery())
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(ServerError::Transport(TransportError::TunReadFailed { .. }))
        ));

        let channel = user.channel();
        let received = channel.to_client.lock().await.try_recv().ok();
        assert_eq!(received, Some(packet));
        f.scope.cancel();
    }

    #[tokio::test]
    async fn test_logout_removes_routes() {
        let f = fixture(8);
        let user = f.users.register("a", Ip::new(10, 8, 0, 2)).unwrap();
        f.controller.user_login(Arc::clone(&user)).unwrap();
        assert_eq!(f.routing.lookup(user.address), Some(user.id));
        assert_eq!(f.controller.logged_in_count(), 1);

        assert!(f.controller.user_logout(user.id));
        assert!(f.routing.lookup(user.address).is_none());
        assert!(!f.controller.user_logout(user.id));
        assert_eq!(f.controller.logged_in_count(), 0);
    }

    #[tokio::test]
    async fn test_second_login_rejected() {
        let f = fixture(8);
        let user = f.users.register("a", Ip::new(10, 8, 0, 2)).unwrap();
        f.controller.user_login(Arc::clone(&user)).unwrap();

        assert!(matches!(
            f.controller.user_login(user),
            Err(ServerError::Internal { .. })
        ));
    }

    #[tokio::test]
    async fn test_topology_published() {
        let f = fixture(8);
        let mut rx = f.controller.subscribe_topology();
        assert!(rx.borrow_and_update().is_empty());

        f.controller.on_channel_topology_update(&[4000, 4001]);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), vec![4000, 4001]);
        assert_eq!(f.controller.current_topology(), vec![4000, 4001]);
    }
}
