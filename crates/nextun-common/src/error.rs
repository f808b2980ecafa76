// ============================================
// File: crates/nextun-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Provides the error types shared by every nextun crate, most importantly
//! the typed parse failure for address and CIDR text.
//!
//! ## Main Functionality
//! - `ParseError`: Failure to parse an IPv4 address or CIDR network
//! - `CommonError`: Base error enum wrapped by the other crates
//! - `Result<T>`: Type alias using `CommonError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Parse errors carry the offending input so configuration errors can be
//!   reported verbatim; never put secrets into these strings
//! - Implement `From` for new wrapped errors instead of mapping by hand
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Common result type for operations that may fail.
pub type Result<T> = std::result::Result<T, CommonError>;

// ============================================
// ParseError
// ============================================

/// Failure to turn text into an [`crate::ip::Ip`] or [`crate::ip::IpNet`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The text is not an IP address at all.
    #[error("Invalid IP address: '{input}'")]
    InvalidAddress {
        /// Text that failed to parse
        input: String,
    },

    /// The text is a valid address, but not an IPv4 one.
    #[error("Not an IPv4 address: '{input}'")]
    NotIpv4 {
        /// Text that failed to parse
        input: String,
    },

    /// The text is not of the form `address/prefix`.
    #[error("Invalid CIDR '{input}': {reason}")]
    InvalidCidr {
        /// Text that failed to parse
        input: String,
        /// What is wrong with it
        reason: &'static str,
    },
}

impl ParseError {
    /// Creates an `InvalidAddress` error.
    pub fn invalid_address(input: impl Into<String>) -> Self {
        Self::InvalidAddress {
            input: input.into(),
        }
    }

    /// Creates an `InvalidCidr` error.
    pub fn invalid_cidr(input: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidCidr {
            input: input.into(),
            reason,
        }
    }

    /// Returns the text that failed to parse.
    #[must_use]
    pub fn input(&self) -> &str {
        match self {
            Self::InvalidAddress { input }
            | Self::NotIpv4 { input }
            | Self::InvalidCidr { input, .. } => input,
        }
    }
}

// ============================================
// CommonError
// ============================================

/// Common error types shared across nextun crates.
#[derive(Error, Debug)]
pub enum CommonError {
    /// Address or network text could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Invalid input data provided.
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput {
        /// Name of the field or parameter
        field: String,
        /// Description of what's wrong
        reason: String,
    },

    /// Internal error (bug or unexpected condition).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of what went wrong
        message: String,
    },
}

impl CommonError {
    /// Creates an `InvalidInput` error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error was caused by bad caller input.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::InvalidInput { .. })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::invalid_cidr("10.0.0.0", "missing '/'");
        assert!(err.to_string().contains("10.0.0.0"));
        assert!(err.to_string().contains("missing '/'"));
        assert_eq!(err.input(), "10.0.0.0");
    }

    #[test]
    fn test_error_classification() {
        let parse: CommonError = ParseError::invalid_address("x").into();
        assert!(parse.is_client_error());

        let internal = CommonError::internal("bug");
        assert!(!internal.is_client_error());
    }
}
