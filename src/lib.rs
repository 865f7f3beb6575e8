pub mod client;
pub mod common;
pub mod encryption;
pub mod engine;

pub use client::{ClientCore, ClientMiddleware, Mailbox};
pub use common::error::{ClientError, Result};
