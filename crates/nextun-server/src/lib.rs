// ============================================
// File: crates/nextun-server/src/lib.rs
// ============================================
//! # nextun Server Library
//!
//! ## Creation Reason
//! Control plane of the nextun tunnel server: keeps a pool of data
//! channel listeners alive, hands out virtual addresses and moves
//! packets between users and the virtual interface.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: Server configuration management
//! - [`server`]: Main server orchestration
//! - [`services`]: Business logic services
//!   - [`services::channel_pool`]: Data channel pool
//!   - [`services::address_pool`]: Virtual address allocation
//!   - [`services::users`]: User store
//!   - [`services::routing`]: Packet routing
//!   - [`services::controller`]: Per-user forwarding
//! - [`handlers`]: Packet checks and routing
//! - [`error`]: Server-specific error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        nextun Server                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐  │
//! │  │   Config    │────►│   Server    │────►│   Controller    │  │
//! │  │             │     │ Orchestrator│     │     Group       │  │
//! │  └─────────────┘     └──────┬──────┘     └────────┬────────┘  │
//! │                             │                     │           │
//! │         ┌───────────────────┼───────────────────┬─┘           │
//! │         ▼                   ▼                   ▼             │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     │
//! │  │  Channel    │     │   Routing   │     │  Address    │     │
//! │  │    Pool     │     │   Service   │     │    Pool     │     │
//! │  └─────────────┘     └─────────────┘     └─────────────┘     │
//! │                                                               │
//! ├───────────────────────────────────────────────────────────────┤
//! │                     Transport Layer                           │
//! │  ┌─────────────────────┐     ┌─────────────────────────────┐ │
//! │  │  TCP data channels  │     │       TUN Device            │ │
//! │  │  (framed packets)   │     │     (IP packets)            │ │
//! │  └─────────────────────┘     └─────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! Client → TCP channel → user queue → source check → TUN → Internet
//! Client ← TCP channel ← user queue ← route        ← TUN ← Internet
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Configuration changes require restart (no hot-reload)
//! - Graceful shutdown waits for every task on the server scope
//!
//! ## Last Modified
//! v0.1.0 - Initial server library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod services;

// Re-export primary types
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::{Server, SessionGrant};
