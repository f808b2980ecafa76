// ============================================
// File: crates/nextun-server/src/error.rs
// ============================================
//! # Server Error Types
//!
//! ## Last Modified
//! v0.1.0 - Initial server errors

use thiserror::Error;

use nextun_common::error::{CommonError, ParseError};
use nextun_common::ip::Ip;
use nextun_common::types::UserId;
use nextun_transport::error::TransportError;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error types.
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        path: String,
        reason: String,
    },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        field: String,
        reason: String,
    },

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("User limit reached: max {limit} users")]
    UserLimitReached {
        limit: usize,
    },

    #[error("Address pool exhausted")]
    AddressPoolExhausted,

    #[error("No data channel available")]
    NoChannelAvailable,

    #[error("No route found for {destination}")]
    NoRoute {
        destination: Ip,
    },

    #[error("Invalid packet from {user}: {reason}")]
    InvalidPacket {
        user: UserId,
        reason: String,
    },

    #[error("Malformed packet: {reason}")]
    MalformedPacket {
        reason: String,
    },

    #[error("Server failed to start: {reason}")]
    StartupFailed {
        reason: String,
    },

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidPacket` error.
    pub fn invalid_packet(user: UserId, reason: impl Into<String>) -> Self {
        Self::InvalidPacket {
            user,
            reason: reason.into(),
        }
    }

    /// Creates a `MalformedPacket` error.
    pub fn malformed_packet(reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            reason: reason.into(),
        }
    }

    /// Returns `true` if a single packet was at fault.
    #[must_use]
    pub const fn is_packet_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPacket { .. } | Self::MalformedPacket { .. } | Self::NoRoute { .. }
        )
    }

    /// Creates a `StartupFailed` error.
    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the configuration was at fault.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    /// Returns `true` if the same call may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::NoChannelAvailable
            | Self::AddressPoolExhausted
            | Self::UserLimitReached { .. } => true,
            _ => false,
        }
    }
}

impl From<ParseError> for ServerError {
    fn from(err: ParseError) -> Self {
        Self::Common(CommonError::Parse(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::config_load("/etc/nextun/server.toml", "file not found");
        assert!(err.to_string().contains("/etc/nextun/server.toml"));
    }

    #[test]
    fn test_error_classification() {
        let config_err = ServerError::config_invalid("channels.count", "must be > 0");
        assert!(config_err.is_config_error());
        assert!(!config_err.is_retryable());

        assert!(ServerError::NoChannelAvailable.is_retryable());
        assert!(!ServerError::UserNotFound(UserId::new(3)).is_retryable());
        assert!(ServerError::malformed_packet("short").is_packet_error());

        let interrupted = std::io::Error::from(std::io::ErrorKind::Interrupted);
        let transient = ServerError::from(TransportError::from(interrupted));
        assert!(transient.is_retryable());
        let gone = ServerError::from(TransportError::TunReadFailed {
            reason: "device removed".into(),
        });
        assert!(!gone.is_retryable());
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: ServerError = "x/24".parse::<nextun_common::IpNet>().unwrap_err().into();
        assert!(matches!(err, ServerError::Common(CommonError::Parse(_))));
    }
}
