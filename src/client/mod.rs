//! # Client Components
//!
//! The client is split into two main components:
//!
//! ## Core Client ([`client`])
//! Runs the registration and write-with-audit protocols against the leader
//! and follower. Owns the engine, the key material and the mailbox
//! [`registry`].
//!
//! ## Client Middleware ([`middleware`])
//! Reads commands line by line, spawns one task per command and reports
//! each outcome. Optionally records [`metrics`].

pub mod client;
pub mod metrics;
pub mod middleware;
pub mod registry;

// Re-export for convenience
pub use client::{ClientCore, ServerPair};
pub use metrics::ClientMetrics;
pub use middleware::{ClientMiddleware, Command, CommandError, DispatchSummary};
pub use registry::{Mailbox, MailboxRegistry};
