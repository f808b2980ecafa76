// ============================================
// File: crates/nextun-server/src/services/mod.rs
// ============================================
//! # Server Services
//!
//! ## Creation Reason
//! Business logic of the tunnel server, separated from transport and
//! framing concerns.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`channel_pool`]: keeps N data channel listeners alive
//! - [`address_pool`]: virtual address allocation
//! - [`users`]: logged-in users and their packet queues
//! - [`routing`]: virtual address → user lookup
//! - [`controller`]: per-user forwarding and topology publication
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────┐  topology  ┌───────────────────────┐ │
//! │  │   ChannelPool    │──────────► │   ControllerGroup     │ │
//! │  │  - N listeners   │            │  - per-user pumps     │ │
//! │  │  - refill slots  │            │  - delivery loop      │ │
//! │  └──────────────────┘            └──────────┬────────────┘ │
//! │                                              │              │
//! │  ┌──────────────────┐   ┌──────────────────▼────────────┐ │
//! │  │   AddressPool    │   │  UserStore / RoutingService   │ │
//! │  │  - allocate      │   │  - queues per user            │ │
//! │  │  - release       │   │  - VIP → user lookup          │ │
//! │  └──────────────────┘   └───────────────────────────────┘ │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Services are testable in isolation; the pool only sees traits
//! - Logout must release the address, the user and the routes
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod address_pool;
pub mod channel_pool;
pub mod controller;
pub mod routing;
pub mod users;

// Re-export primary types
pub use address_pool::AddressPool;
pub use channel_pool::{ChannelDelegate, ChannelPool};
pub use controller::ControllerGroup;
pub use routing::RoutingService;
pub use users::{StatsSnapshot, User, UserStats, UserStore};
