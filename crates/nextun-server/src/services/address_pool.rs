// ============================================
// File: crates/nextun-server/src/services/address_pool.rs
// ============================================
//! # Address Pool
//!
//! ## Creation Reason
//! Hands out virtual addresses inside the server subnet to users as
//! they log in, and takes them back on logout.
//!
//! ## Main Functionality
//! - `AddressPool`: first-fit allocation over an `IpNet`
//! - Network, broadcast and gateway addresses are never handed out
//!
//! ## Example
//! ```
//! use nextun_common::ip::Ip;
//! use nextun_server::services::AddressPool;
//!
//! let pool = AddressPool::new("10.8.0.1/24".parse().unwrap()).unwrap();
//!
//! let ip = pool.allocate().unwrap();
//! assert_eq!(ip, Ip::new(10, 8, 0, 2));
//!
//! assert!(pool.release(ip));
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The gateway is the host part of the configured CIDR
//! - Allocation is O(n) in the subnet size; fine up to a /16
//!
//! ## Last Modified
//! v0.1.0 - Initial address pool

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{debug, warn};

use nextun_common::ip::{Ip, IpNet};

use crate::error::{Result, ServerError};

/// Virtual address pool for one subnet.
///
/// # Capacity
/// For a /24: 256 addresses - network - broadcast - gateway = 253
pub struct AddressPool {
    net: IpNet,
    allocated: Mutex<HashSet<Ip>>,
}

impl AddressPool {
    /// Creates a pool for `net`; its host part is reserved as the gateway.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` if the subnet leaves no room for clients or
    /// the gateway is the network or broadcast address.
    pub fn new(net: IpNet) -> Result<Self> {
        if net.prefix_len() > 30 {
            return Err(ServerError::config_invalid(
                "vpn.net",
                "prefix length must be <= 30 for usable addresses",
            ));
        }

        let gateway = net.ip();
        if gateway == net.network() || gateway == net.broadcast() {
            return Err(ServerError::config_invalid(
                "vpn.net",
                "gateway cannot be the network or broadcast address",
            ));
        }

        let pool = Self {
            net,
            allocated: Mutex::new(HashSet::new()),
        };

        debug!(
            net = %net,
            gateway = %gateway,
            capacity = pool.capacity(),
            "Address pool initialized"
        );

        Ok(pool)
    }

    /// Allocates the lowest free address.
    ///
    /// # Errors
    /// Returns `AddressPoolExhausted` if every address is in use.
    pub fn allocate(&self) -> Result<Ip> {
        let mut allocated = self.allocated.lock();
        let first = self.net.network().to_u32() + 1;
        let last = self.net.broadcast().to_u32() - 1;

        for candidate in (first..=last).map(Ip::from_u32) {
            if candidate == self.gateway() || allocated.contains(&candidate) {
                continue;
            }

            allocated.insert(candidate);
            debug!(ip = %candidate, in_use = allocated.len(), "Address allocated");
            return Ok(candidate);
        }

        warn!(in_use = allocated.len(), "Address pool exhausted");
        Err(ServerError::AddressPoolExhausted)
    }

    /// Releases an address. Returns `false` if it was not allocated.
    pub fn release(&self, ip: Ip) -> bool {
        let mut allocated = self.allocated.lock();
        let removed = allocated.remove(&ip);

        if removed {
            debug!(ip = %ip, in_use = allocated.len(), "Address released");
        } else {
            warn!(ip = %ip, "Attempted to release unallocated address");
        }

        removed
    }

    /// Checks if an address is currently allocated.
    #[must_use]
    pub fn is_allocated(&self, ip: Ip) -> bool {
        self.allocated.lock().contains(&ip)
    }

    /// Returns the number of allocated addresses.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.allocated.lock().len()
    }

    /// Returns the total number of addresses clients can get.
    #[must_use]
    pub fn capacity(&self) -> usize {
        // network, broadcast and gateway
        usize::try_from(self.net.size() - 3).unwrap_or(usize::MAX)
    }

    /// Returns the number of addresses still free.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.capacity() - self.allocated_count()
    }

    /// Returns the subnet, host part included.
    #[must_use]
    pub const fn net(&self) -> IpNet {
        self.net
    }

    /// Returns the gateway address.
    #[must_use]
    pub const fn gateway(&self) -> Ip {
        self.net.ip()
    }

    /// Checks if an address could be handed out by this pool.
    #[must_use]
    pub fn contains(&self, ip: Ip) -> bool {
        self.net.contains(ip)
            && ip != self.net.network()
            && ip != self.net.broadcast()
            && ip != self.gateway()
    }
}

impl std::fmt::Debug for AddressPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressPool")
            .field("net", &self.net.to_string())
            .field("allocated", &self.allocated_count())
            .field("capacity", &self.capacity())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(cidr: &str) -> AddressPool {
        AddressPool::new(cidr.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_pool_creation() {
        let pool = pool("100.64.0.1/24");

        assert_eq!(pool.gateway(), Ip::new(100, 64, 0, 1));
        assert_eq!(pool.net().network(), Ip::new(100, 64, 0, 0));
        assert_eq!(pool.capacity(), 253);
        assert_eq!(pool.available_count(), 253);
    }

    #[test]
    fn test_allocate_skips_reserved() {
        let pool = pool("10.0.0.1/24");

        assert_eq!(pool.allocate().unwrap(), Ip::new(10, 0, 0, 2));
        assert_eq!(pool.allocate().unwrap(), Ip::new(10, 0, 0, 3));
        assert_eq!(pool.allocated_count(), 2);
    }

    #[test]
    fn test_gateway_in_middle_is_skipped() {
        let pool = pool("10.0.0.3/29");

        let got: Vec<Ip> = (0..5).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(
            got,
            vec![
                Ip::new(10, 0, 0, 1),
                Ip::new(10, 0, 0, 2),
                Ip::new(10, 0, 0, 4),
                Ip::new(10, 0, 0, 5),
                Ip::new(10, 0, 0, 6),
            ]
        );
        assert!(matches!(pool.allocate(), Err(ServerError::AddressPoolExhausted)));
    }

    #[test]
    fn test_release_and_reuse() {
        let pool = pool("10.0.0.1/24");

        let ip1 = pool.allocate().unwrap();
        let _ip2 = pool.allocate().unwrap();

        assert!(pool.release(ip1));
        assert!(!pool.release(ip1));
        assert!(!pool.is_allocated(ip1));

        assert_eq!(pool.allocate().unwrap(), ip1);
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool = pool("10.0.0.1/30");

        assert_eq!(pool.allocate().unwrap(), Ip::new(10, 0, 0, 2));
        assert!(matches!(pool.allocate(), Err(ServerError::AddressPoolExhausted)));
    }

    #[test]
    fn test_contains() {
        let pool = pool("100.64.0.1/24");

        assert!(pool.contains(Ip::new(100, 64, 0, 2)));
        assert!(pool.contains(Ip::new(100, 64, 0, 254)));
        assert!(!pool.contains(Ip::new(100, 64, 0, 1)));
        assert!(!pool.contains(Ip::new(100, 64, 0, 255)));
        assert!(!pool.contains(Ip::new(100, 64, 1, 1)));
    }

    #[test]
    fn test_invalid_subnets() {
        assert!(AddressPool::new("10.0.0.1/31".parse().unwrap()).is_err());
        assert!(AddressPool::new("10.0.0.0/24".parse().unwrap()).is_err());
        assert!(AddressPool::new("10.0.0.255/24".parse().unwrap()).is_err());
    }
}
