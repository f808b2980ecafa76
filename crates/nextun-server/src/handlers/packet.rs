// ============================================
// File: crates/nextun-server/src/handlers/packet.rs
// ============================================
//! # Packet Handler
//!
//! ## Creation Reason
//! Checks and routes raw IPv4 packets moving between user queues and
//! the virtual interface.
//!
//! ## Main Functionality
//! - `PacketHandler`: source check for client packets, destination
//!   routing for interface packets
//! - IPv4 header field extraction
//!
//! ## Packet Processing
//!
//! ### Client → Internet (data channel → TUN)
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  1. Pop packet from the user's from-client queue            │
//! │  2. Check it is IPv4 and long enough for a header           │
//! │  3. Check source address equals the user's address          │
//! │  4. Write to TUN device                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Internet → Client (TUN → data channel)
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  1. Read IP packet from TUN                                 │
//! │  2. Extract destination address                             │
//! │  3. Lookup route → user                                     │
//! │  4. Push onto the user's to-client queue                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Hot path: no allocation beyond error construction
//! - Source validation prevents a user spoofing another user's address
//!
//! ## Last Modified
//! v0.1.0 - Initial packet handler

use std::sync::Arc;

use tracing::{trace, warn};

use nextun_common::ip::Ip;

use crate::error::{Result, ServerError};
use crate::services::{RoutingService, User, UserStore};

// ============================================
// Constants
// ============================================

/// Minimum IPv4 header size.
const IPV4_HEADER_MIN_SIZE: usize = 20;

/// Offset of source IP in IPv4 header.
const IPV4_SRC_OFFSET: usize = 12;

/// Offset of destination IP in IPv4 header.
const IPV4_DST_OFFSET: usize = 16;

// ============================================
// PacketHandler
// ============================================

/// Handles data packet checks and routing.
///
/// # Thread Safety
/// All operations are thread-safe and can be called concurrently.
pub struct PacketHandler {
    users: Arc<UserStore>,
    routing: Arc<RoutingService>,
}

impl PacketHandler {
    /// Creates a new packet handler.
    #[must_use]
    pub fn new(users: Arc<UserStore>, routing: Arc<RoutingService>) -> Self {
        Self { users, routing }
    }

    /// Validates a packet a client sent before it goes to the interface.
    ///
    /// # Errors
    /// - Packet is not IPv4 or shorter than an IPv4 header
    /// - Source address differs from the user's address
    pub fn check_client_packet(&self, user: &User, packet: &[u8]) -> Result<()> {
        if packet.len() < IPV4_HEADER_MIN_SIZE {
            return Err(ServerError::invalid_packet(user.id, "IP packet too short"));
        }

        let src_ip = extract_ipv4_src(packet)
            .map_err(|e| ServerError::invalid_packet(user.id, e.to_string()))?;
        if src_ip != user.address {
            user.stats.record_spoofed();
            warn!(
                user = %user.id,
                expected = %user.address,
                actual = %src_ip,
                "IP spoofing detected"
            );
            return Err(ServerError::invalid_packet(user.id, "Source IP mismatch"));
        }

        user.stats.record_rx(packet.len() as u64);

        trace!(user = %user.id, len = packet.len(), "Client packet accepted");
        Ok(())
    }

    /// Finds the user a packet read from the interface belongs to.
    ///
    /// # Errors
    /// - Packet is not IPv4 or too short
    /// - No route for the destination address
    /// - The routed user has already logged out
    pub fn route_tun_packet(&self, packet: &[u8]) -> Result<Arc<User>> {
        if packet.len() < IPV4_HEADER_MIN_SIZE {
            return Err(ServerError::malformed_packet("TUN packet too short"));
        }

        let dst_ip = extract_ipv4_dst(packet)?;
        let user_id = self.routing.lookup_or_error(dst_ip)?;
        let user = self.users.find_or_error(user_id)?;

        trace!(user = %user_id, dst_ip = %dst_ip, len = packet.len(), "TUN packet routed");
        Ok(user)
    }
}

impl std::fmt::Debug for PacketHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHandler")
            .field("users", &self.users.count())
            .field("routes", &self.routing.count())
            .finish()
    }
}

// ============================================
// Helper Functions
// ============================================

/// Extracts the source IPv4 address from an IP packet.
pub fn extract_ipv4_src(packet: &[u8]) -> Result<Ip> {
    extract_ipv4_field(packet, IPV4_SRC_OFFSET)
}

/// Extracts the destination IPv4 address from an IP packet.
pub fn extract_ipv4_dst(packet: &[u8]) -> Result<Ip> {
    extract_ipv4_field(packet, IPV4_DST_OFFSET)
}

fn extract_ipv4_field(packet: &[u8], offset: usize) -> Result<Ip> {
    let Some(field) = packet.get(offset..offset + 4) else {
        return Err(ServerError::malformed_packet(
            "Packet too short for IPv4 header",
        ));
    };

    let version = packet[0] >> 4;
    if version != 4 {
        return Err(ServerError::malformed_packet(format!(
            "Expected IPv4, got version {version}"
        )));
    }

    let mut octets = [0u8; 4];
    octets.copy_from_slice(field);
    Ok(Ip::from_octets(octets))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_packet(src: Ip, dst: Ip) -> Vec<u8> {
        let mut packet = vec![0u8; 28];
        packet[0] = 0x45;
        packet[IPV4_SRC_OFFSET..IPV4_SRC_OFFSET + 4].copy_from_slice(&src.octets());
        packet[IPV4_DST_OFFSET..IPV4_DST_OFFSET + 4].copy_from_slice(&dst.octets());
        packet
    }

    fn handler() -> (PacketHandler, Arc<UserStore>, Arc<RoutingService>) {
        let users = Arc::new(UserStore::new(10, 4));
        let routing = Arc::new(RoutingService::new());
        let handler = PacketHandler::new(Arc::clone(&users), Arc::clone(&routing));
        (handler, users, routing)
    }

    #[test]
    fn test_extract_addresses() {
        let packet = ipv4_packet(Ip::new(10, 8, 0, 2), Ip::new(8, 8, 8, 8));

        assert_eq!(extract_ipv4_src(&packet).unwrap(), Ip::new(10, 8, 0, 2));
        assert_eq!(extract_ipv4_dst(&packet).unwrap(), Ip::new(8, 8, 8, 8));
    }

    #[test]
    fn test_extract_rejects_ipv6_and_short() {
        let mut packet = ipv4_packet(Ip::new(10, 8, 0, 2), Ip::new(8, 8, 8, 8));
        packet[0] = 0x60;
        assert!(matches!(
            extract_ipv4_src(&packet),
            Err(ServerError::MalformedPacket { .. })
        ));

        assert!(extract_ipv4_dst(&[0x45; 10]).is_err());
    }

    #[test]
    fn test_client_packet_source_check() {
        let (handler, users, _) = handler();
        let user = users.register("a", Ip::new(10, 8, 0, 2)).unwrap();

        let good = ipv4_packet(Ip::new(10, 8, 0, 2), Ip::new(1, 1, 1, 1));
        assert!(handler.check_client_packet(&user, &good).is_ok());

        let spoofed = ipv4_packet(Ip::new(10, 8, 0, 3), Ip::new(1, 1, 1, 1));
        let err = handler.check_client_packet(&user, &spoofed).unwrap_err();
        assert!(matches!(err, ServerError::InvalidPacket { user: id, .. } if id == user.id));

        let stats = user.stats.snapshot();
        assert_eq!(stats.packets_rx, 1);
        assert_eq!(stats.spoofed_rejected, 1);
    }

    #[test]
    fn test_client_packet_too_short() {
        let (handler, users, _) = handler();
        let user = users.register("a", Ip::new(10, 8, 0, 2)).unwrap();

        assert!(handler.check_client_packet(&user, &[0x45; 8]).is_err());
    }

    #[test]
    fn test_route_tun_packet() {
        let (handler, users, routing) = handler();
        let user = users.register("a", Ip::new(10, 8, 0, 2)).unwrap();
        routing.add_route(user.address, user.id);

        let packet = ipv4_packet(Ip::new(1, 1, 1, 1), Ip::new(10, 8, 0, 2));
        assert_eq!(handler.route_tun_packet(&packet).unwrap().id, user.id);

        let unrouted = ipv4_packet(Ip::new(1, 1, 1, 1), Ip::new(10, 8, 0, 9));
        assert!(matches!(
            handler.route_tun_packet(&unrouted),
            Err(ServerError::NoRoute { .. })
        ));
    }

    #[test]
    fn test_route_to_departed_user() {
        let (handler, users, routing) = handler();
        let user = users.register("a", Ip::new(10, 8, 0, 2)).unwrap();
        routing.add_route(user.address, user.id);
        users.remove(user.id);

        let packet = ipv4_packet(Ip::new(1, 1, 1, 1), Ip::new(10, 8, 0, 2));
        assert!(matches!(
            handler.route_tun_packet(&packet),
            Err(ServerError::UserNotFound(_))
        ));
    }
}
