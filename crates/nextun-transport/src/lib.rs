// ============================================
// File: crates/nextun-transport/src/lib.rs
// ============================================
//! # nextun Transport - Network I/O Layer
//!
//! ## Creation Reason
//! Provides the network side of the tunnel server: TCP data channel
//! listeners, their wire framing, and the virtual interface seam.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: Listener, factory, host and virtual interface traits
//! - [`packet`]: Data channel frames and their codec
//! - [`tcp`]: TCP data channel listener
//! - [`tun`]: In-memory virtual interface
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              nextun-server                          │
//! │                    │                                │
//! │                    ▼                                │
//! │            nextun-transport  ◄── You are here      │
//! │                    │                                │
//! │                    ▼                                │
//! │             nextun-common                           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//!   Clients ──TCP frames──► TcpChannelListener ──► user queues
//!                                                      │
//!                                                      ▼
//!   Network ◄──────────── TunDevice ◄──────────── controller
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always go through the traits; the server never names `TcpChannelListener`
//!   outside of wiring
//! - Listener lifetime is reported only by `serve()` returning
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod packet;
pub mod tcp;
pub mod traits;
pub mod tun;

// Re-export primary types
pub use error::{Result, TransportError};
pub use packet::{Frame, FrameCodec};
pub use tcp::{TcpChannelListener, TcpListenerFactory};
pub use traits::{
    ChannelHost, DataChannelListener, ListenerFactory, SharedReceiver, TunConfig, TunDevice,
    UserChannel,
};
pub use tun::QueueTun;
