// ============================================
// File: crates/nextun-server/src/handlers/mod.rs
// ============================================
//! # Packet Handlers
//!
//! ## Creation Reason
//! Per-packet checks shared by both forwarding directions.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`packet`]: source validation and destination routing
//!
//! ## Data Flow
//! ```text
//! Client → TUN:
//!   1. Pop packet from the user's queue
//!   2. Validate source IP
//!   3. Write to TUN device
//!
//! TUN → Client:
//!   1. Read IP packet from TUN
//!   2. Extract destination IP
//!   3. Lookup route → user
//!   4. Queue for the user's data channels
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Handlers must be fast (critical path)
//! - Log suspicious activity (spoofed sources)
//!
//! ## Last Modified
//! v0.1.0 - Initial handlers structure

pub mod packet;

pub use packet::PacketHandler;
