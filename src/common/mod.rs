//! # Common Components
//!
//! Plumbing shared by the client core and the command dispatcher.
//!
//! ## Modules
//!
//! - [`messages`]: Wire format of every leader and follower exchange
//! - [`connection`]: Byte-stream session with exact reads and timeouts
//! - [`tls`]: TLS dialer trusting a configured CA
//! - [`config`]: TOML configuration loading and validation
//! - [`error`]: The client error type

pub mod config;
pub mod connection;
pub mod error;
pub mod messages;
pub mod tls;
