// ============================================
// File: crates/nextun-server/src/services/routing.rs
// ============================================
//! # Routing Service
//!
//! ## Creation Reason
//! Maps virtual addresses to users so packets read from the virtual
//! interface reach the right user's queue.
//!
//! ## Routing Table Structure
//! ```text
//! ┌─────────────────┬──────────┐
//! │  Virtual IP     │  User    │
//! ├─────────────────┼──────────┤
//! │  10.8.0.2       │  1       │
//! │  10.8.0.3       │  7       │
//! └─────────────────┴──────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Routes must be removed when users log out
//! - One virtual IP maps to exactly one user
//!
//! ## Last Modified
//! v0.1.0 - Initial routing service

use dashmap::DashMap;
use tracing::debug;

use nextun_common::ip::Ip;
use nextun_common::types::UserId;

use crate::error::{Result, ServerError};

/// Virtual IP to user routing table.
pub struct RoutingService {
    routes: DashMap<Ip, UserId>,
}

impl RoutingService {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    /// Adds a route, returning the user it replaced.
    pub fn add_route(&self, virtual_ip: Ip, user: UserId) -> Option<UserId> {
        let previous = self.routes.insert(virtual_ip, user);

        if let Some(old) = previous {
            debug!(virtual_ip = %virtual_ip, old_user = %old, new_user = %user, "Route replaced");
        } else {
            debug!(virtual_ip = %virtual_ip, user = %user, "Route added");
        }

        previous
    }

    /// Removes a route.
    pub fn remove_route(&self, virtual_ip: Ip) -> Option<UserId> {
        let removed = self.routes.remove(&virtual_ip).map(|(_, user)| user);

        if let Some(user) = removed {
            debug!(virtual_ip = %virtual_ip, user = %user, "Route removed");
        }

        removed
    }

    /// User routed at `virtual_ip`, if any.
    #[must_use]
    pub fn lookup(&self, virtual_ip: Ip) -> Option<UserId> {
        self.routes.get(&virtual_ip).map(|r| *r.value())
    }

    /// Looks up the user.
    ///
    /// # Errors
    /// Returns `NoRoute` if nothing is routed at `virtual_ip`.
    pub fn lookup_or_error(&self, virtual_ip: Ip) -> Result<UserId> {
        self.lookup(virtual_ip).ok_or(ServerError::NoRoute {
            destination: virtual_ip,
        })
    }

    /// Number of routes.
    #[must_use]
    pub fn count(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no route is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Removes every route pointing at `user`.
    pub fn remove_user_routes(&self, user: UserId) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, owner| *owner != user);
        let count = before.saturating_sub(self.routes.len());

        if count > 0 {
            debug!(user = %user, count, "Removed user routes");
        }

        count
    }
}

impl Default for RoutingService {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoutingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingService")
            .field("routes", &self.count())
            .finish()
    }
}
