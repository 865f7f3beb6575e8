//! # Secret-Sharing Engine
//!
//! The engine turns a mailbox index and payload into two complementary
//! shares, one per server, such that either share alone reveals nothing
//! about the index or the payload. It also produces the audit shares the
//! servers use to check that a write encodes a single well-formed update.
//!
//! ## Slots
//!
//! Engines may keep scratch state between [`ShareEngine::build_write_query`]
//! and [`ShareEngine::build_audit_shares`]. That state is partitioned by
//! slot, and callers must never run two operations on the same slot at once.
//! The [`SlotPool`](crate::client::registry::SlotPool) enforces this.
//!
//! ## Implementations
//!
//! - [`LinearShareEngine`]: XOR sharing of the full point vector.

pub mod linear;

use std::fmt;

use thiserror::Error;

use crate::common::messages::{
    VirtualAddress, AUDIT_SHARE_SIZE, ROW_KEY_SIZE, SEED_SIZE,
};

pub use linear::LinearShareEngine;

/// Errors returned by a [`ShareEngine`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("payload of {payload} bytes exceeds mailbox data size {data_size}")]
    PayloadTooLarge { payload: usize, data_size: u32 },

    #[error("data size must be positive")]
    ZeroDataSize,

    #[error("slot {slot} out of range (engine has {num_slots} slots)")]
    InvalidSlot { slot: usize, num_slots: usize },

    #[error("slot {0} is already running an operation")]
    SlotBusy(usize),

    #[error("row {local_index} is not known to the engine ({num_rows} rows)")]
    UnknownRow { local_index: u32, num_rows: u32 },

    #[error("audit requested on slot {0} without a matching write query")]
    AuditWithoutQuery(usize),

    #[error("query shares are inconsistent: {0}")]
    MalformedQuery(String),

    #[error("randomness unavailable: {0}")]
    Randomness(String),
}

/// Complementary row keys handed to the leader and follower at registration.
pub struct RowKeyPair {
    pub key_for_leader: [u8; ROW_KEY_SIZE],
    pub key_for_follower: [u8; ROW_KEY_SIZE],
}

impl fmt::Debug for RowKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowKeyPair([REDACTED])")
    }
}

/// Query shares for one write.
///
/// `query_for_follower` must only ever leave the process inside a sealed
/// envelope, so neither share is printed by `Debug`.
pub struct WriteQueryShares {
    pub query_for_leader: Vec<u8>,
    pub query_for_follower: Vec<u8>,
    pub query_size: u32,
    pub payload_size: u32,
}

impl fmt::Debug for WriteQueryShares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteQueryShares")
            .field("query_size", &self.query_size)
            .field("payload_size", &self.payload_size)
            .finish_non_exhaustive()
    }
}

/// Audit shares derived from the leader's seed.
pub struct AuditShares {
    /// Sent to the leader in the clear.
    pub share_a: [u8; AUDIT_SHARE_SIZE],
    /// Sealed for the follower.
    pub share_b: [u8; AUDIT_SHARE_SIZE],
}

impl fmt::Debug for AuditShares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuditShares([REDACTED])")
    }
}

/// The secret-sharing primitive the protocol orchestrator drives.
///
/// Process-wide setup (the number of slots) happens in the implementor's
/// constructor.
pub trait ShareEngine: Send + Sync + 'static {
    /// Number of slots this engine was initialized with.
    fn num_slots(&self) -> usize;

    /// Produce the row keys for a new mailbox of `data_size` bytes.
    fn new_row_keys(&self, data_size: u32) -> Result<RowKeyPair, EngineError>;

    /// Share a point update of `payload` at `local_index`.
    ///
    /// Fails with [`EngineError::PayloadTooLarge`] if the payload does not
    /// fit in `data_size`, and with [`EngineError::MalformedQuery`] if a
    /// share would exceed [`MAX_FIELD_SIZE`](crate::common::messages::MAX_FIELD_SIZE).
    fn build_write_query(
        &self,
        slot: usize,
        local_index: u32,
        payload: &[u8],
        data_size: u32,
    ) -> Result<WriteQueryShares, EngineError>;

    /// Derive the audit shares for a previously built query.
    fn build_audit_shares(
        &self,
        slot: usize,
        local_index: u32,
        seed: &[u8; SEED_SIZE],
        query: &WriteQueryShares,
    ) -> Result<AuditShares, EngineError>;

    /// Bytes one query share for a mailbox of `data_size` bytes would take
    /// once `local_index` is part of the table.
    fn query_len_with(&self, local_index: u32, data_size: u32) -> u64;

    /// Tell the engine the leader placed `local_index` at `address`.
    fn record_address(
        &self,
        local_index: u32,
        address: VirtualAddress,
    ) -> Result<(), EngineError>;
}
