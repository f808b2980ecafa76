// ============================================
// File: crates/nextun-transport/src/tun/mod.rs
// ============================================
//! # Virtual Interface Module
//!
//! ## Creation Reason
//! Groups the `TunDevice` implementations available to the server.
//!
//! ## What is a TUN Device?
//! A TUN device is a virtual network interface that operates at
//! Layer 3 (IP). Userspace reads and writes raw IP packets on it.
//!
//! ```text
//!   clients ── data channels ──► nextun-server ──► TUN ──► network
//!                                      ▲            │
//!                                      └────────────┘
//!                                   packets for a client VIP
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Only the in-memory `QueueTun` lives here; a kernel driver must
//!   implement `TunDevice` and plug in at `Server::new`
//!
//! ## Last Modified
//! v0.1.0 - Initial module structure

pub mod queue;

pub use queue::QueueTun;
