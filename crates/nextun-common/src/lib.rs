// ============================================
// File: crates/nextun-common/src/lib.rs
// ============================================
//! # nextun Common - Shared Values Library
//!
//! ## Creation Reason
//! Provides the value types, errors and the cancellation scope shared by
//! every nextun crate.
//!
//! ## Main Functionality
//! - [`ip`]: IPv4 address (`Ip`) and CIDR network (`IpNet`) values
//! - [`scope`]: Shared cancellation and outstanding-work tracking
//! - [`types`]: Identifiers (`UserId`)
//! - [`error`]: `ParseError`, `CommonError` and the result alias
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              nextun-server                          │
//! │                    │                                │
//! │                    ▼                                │
//! │            nextun-transport                         │
//! │                    │                                │
//! │                    ▼                                │
//! │             nextun-common  ◄── You are here        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes affect everything
//! - Keep dependencies minimal
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod ip;
pub mod scope;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, ParseError, Result};
pub use ip::{Ip, IpNet};
pub use scope::Scope;
pub use types::UserId;
