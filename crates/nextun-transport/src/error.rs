// ============================================
// File: crates/nextun-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types specific to transport layer operations:
//! data channel sockets, wire framing and the virtual interface.
//!
//! ## Main Functionality
//! - `TransportError`: Primary error enum for transport operations
//! - Error conversion from system errors
//! - Categorization of retryable vs fatal errors
//!
//! ## Error Categories
//! 1. **Network Errors**: bind/accept failures, closed connections
//! 2. **Protocol Errors**: malformed or unexpected frames
//! 3. **TUN Errors**: virtual interface read/write failures
//! 4. **System Errors**: wrapped I/O errors
//!
//! ## ⚠️ Important Note for Next Developer
//! - Bind failures are retried by the channel pool, keep them cheap to build
//! - Protocol errors end one connection, never the listener
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use nextun_common::types::UserId;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Network Errors
    // ========================================

    /// Failed to bind to address.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind to
        addr: SocketAddr,
        /// Why binding failed
        reason: String,
    },

    /// Address already in use.
    #[error("Address {addr} already in use")]
    AddressInUse {
        /// The address that's in use
        addr: SocketAddr,
    },

    /// Accepting a connection failed.
    #[error("Failed to accept on port {port}: {reason}")]
    AcceptFailed {
        /// Listener port
        port: u16,
        /// Why accept failed
        reason: String,
    },

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// The peer did not finish the handshake in time.
    #[error("Handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout {
        /// How long we waited
        timeout_ms: u64,
    },

    // ========================================
    // Protocol Errors
    // ========================================

    /// Frame header carries an unknown kind byte.
    #[error("Unknown frame kind: {0:#04x}")]
    UnknownFrameKind(u8),

    /// Frame payload does not match its kind.
    #[error("Malformed {kind} frame: {reason}")]
    MalformedFrame {
        /// Frame kind name
        kind: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Frame payload exceeds the length field.
    #[error("Frame payload too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Payload length
        len: usize,
        /// Maximum payload length
        max: usize,
    },

    /// A valid frame arrived at the wrong time.
    #[error("Unexpected {kind} frame")]
    UnexpectedFrame {
        /// Frame kind name
        kind: &'static str,
    },

    /// The `Hello` frame names a user the server does not know.
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    // ========================================
    // TUN Device Errors
    // ========================================

    /// Virtual interface read failed.
    #[error("TUN read failed: {reason}")]
    TunReadFailed {
        /// Why read failed
        reason: String,
    },

    /// Virtual interface write failed.
    #[error("TUN write failed: {reason}")]
    TunWriteFailed {
        /// Why write failed
        reason: String,
    },

    // ========================================
    // Configuration Errors
    // ========================================

    /// Invalid configuration.
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig {
        /// Configuration field name
        field: String,
        /// Why it's invalid
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates a `MalformedFrame` error.
    pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            kind,
            reason: reason.into(),
        }
    }

    /// Creates an `UnknownUser` error.
    #[must_use]
    pub const fn unknown_user(user: UserId) -> Self {
        Self::UnknownUser(user)
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an `InvalidConfig` error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error is transient and retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BindFailed { .. } | Self::AddressInUse { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Returns `true` if this error was caused by what the peer sent.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownFrameKind(_)
                | Self::MalformedFrame { .. }
                | Self::FrameTooLarge { .. }
                | Self::UnexpectedFrame { .. }
                | Self::UnknownUser(_)
        )
    }

    /// Returns `true` if this is a network-related error.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::BindFailed { .. }
                | Self::AddressInUse { .. }
                | Self::AcceptFailed { .. }
                | Self::ConnectionClosed
                | Self::HandshakeTimeout { .. }
        )
    }

    /// Returns `true` if this is a virtual interface error.
    #[must_use]
    pub const fn is_tun_error(&self) -> bool {
        matches!(self, Self::TunReadFailed { .. } | Self::TunWriteFailed { .. })
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
    }
}

// ============================================
// Tests
// ============================================
