//! Linear XOR sharing of the point vector.
//!
//! A write to row `i` of a table with `n` rows of `d` bytes is the vector
//! `e_i · payload` of `n · d` bytes. The leader's share is a uniformly random
//! vector `r`, the follower's share is `r ⊕ e_i · payload`. Each share alone
//! is uniform; XORing them reconstructs the update.
//!
//! The audit sketch is linear in the query: for every row, the seed selects
//! a subset of the ten 16-byte sketch blocks, and the row's segment (folded
//! to 16 bytes) is XORed into each selected block. A server holding a query
//! share and the seed can recompute the sketch and compare it with the one
//! the client submitted, and `sketch(A) ⊕ sketch(B)` equals the sketch of a
//! vector with a single nonzero row.
//!
//! This engine does not compress queries the way a DPF does: query size
//! grows with the table. It is not wire-compatible with DPF-based servers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock, TryLockError};

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::{AuditShares, EngineError, RowKeyPair, ShareEngine, WriteQueryShares};
use crate::common::messages::{
    VirtualAddress, AUDIT_SHARE_SIZE, MAX_FIELD_SIZE, ROW_KEY_SIZE, SEED_SIZE,
};

/// Width of a folded row segment and of one sketch block.
const FOLD_SIZE: usize = 16;

/// Number of sketch blocks in an audit share.
const AUDIT_BLOCKS: usize = AUDIT_SHARE_SIZE / FOLD_SIZE;

const AUDIT_DOMAIN: &[u8] = b"mailbox-audit-v1";

/// State a slot carries from `build_write_query` to `build_audit_shares`.
#[derive(Default)]
struct SlotScratch {
    pending: Option<PendingWrite>,
}

struct PendingWrite {
    local_index: u32,
    leader_digest: [u8; 32],
    follower_digest: [u8; 32],
}

struct RowTable {
    addresses: HashMap<u32, VirtualAddress>,
    /// Rows the servers hold: pre-existing rows plus every recorded index.
    num_rows: u32,
}

pub struct LinearShareEngine {
    slots: Vec<Mutex<SlotScratch>>,
    rows: RwLock<RowTable>,
}

impl LinearShareEngine {
    /// Initialize with `num_slots` independent slots and a server table that
    /// already holds `existing_rows` rows.
    pub fn new(num_slots: usize, existing_rows: u32) -> Self {
        let slots = (0..num_slots)
            .map(|_| Mutex::new(SlotScratch::default()))
            .collect();
        Self {
            slots,
            rows: RwLock::new(RowTable {
                addresses: HashMap::new(),
                num_rows: existing_rows,
            }),
        }
    }

    /// Number of rows a query currently spans.
    pub fn num_rows(&self) -> u32 {
        self.rows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .num_rows
    }

    /// Address recorded for `local_index`, if any.
    pub fn address_of(&self, local_index: u32) -> Option<VirtualAddress> {
        self.rows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .addresses
            .get(&local_index)
            .copied()
    }

    /// Sketch of one query share under `seed`.
    ///
    /// Servers call this on the share they received to check the client's
    /// audit share.
    pub fn audit_sketch(
        seed: &[u8; SEED_SIZE],
        query: &[u8],
        data_size: u32,
    ) -> [u8; AUDIT_SHARE_SIZE] {
        let mut sketch = [0u8; AUDIT_SHARE_SIZE];
        let segment_len = data_size.max(1) as usize;

        for (row, segment) in query.chunks(segment_len).enumerate() {
            let mask = row_mask(seed, row as u32);
            let folded = fold_segment(segment);

            for block in 0..AUDIT_BLOCKS {
                if (mask[block / 8] >> (block % 8)) & 1 == 1 {
                    let start = block * FOLD_SIZE;
                    xor_into(&mut sketch[start..start + FOLD_SIZE], &folded);
                }
            }
        }

        sketch
    }

    fn lock_slot(&self, slot: usize) -> Result<MutexGuard<'_, SlotScratch>, EngineError> {
        let cell = self.slots.get(slot).ok_or(EngineError::InvalidSlot {
            slot,
            num_slots: self.slots.len(),
        })?;

        match cell.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(EngineError::SlotBusy(slot)),
        }
    }
}

impl ShareEngine for LinearShareEngine {
    fn num_slots(&self) -> usize {
        self.slots.len()
    }

    fn new_row_keys(&self, data_size: u32) -> Result<RowKeyPair, EngineError> {
        if data_size == 0 {
            return Err(EngineError::ZeroDataSize);
        }

        let mut keys = RowKeyPair {
            key_for_leader: [0u8; ROW_KEY_SIZE],
            key_for_follower: [0u8; ROW_KEY_SIZE],
        };
        fill_random(&mut keys.key_for_leader)?;
        fill_random(&mut keys.key_for_follower)?;
        Ok(keys)
    }

    fn build_write_query(
        &self,
        slot: usize,
        local_index: u32,
        payload: &[u8],
        data_size: u32,
    ) -> Result<WriteQueryShares, EngineError> {
        let mut scratch = self.lock_slot(slot)?;

        if data_size == 0 {
            return Err(EngineError::ZeroDataSize);
        }
        if payload.len() > data_size as usize {
            return Err(EngineError::PayloadTooLarge {
                payload: payload.len(),
                data_size,
            });
        }

        let num_rows = self.num_rows();
        if local_index >= num_rows {
            return Err(EngineError::UnknownRow {
                local_index,
                num_rows,
            });
        }

        let segment_len = data_size as usize;
        let total = (num_rows as usize)
            .checked_mul(segment_len)
            .ok_or_else(|| EngineError::MalformedQuery("query size overflows".into()))?;
        if total > MAX_FIELD_SIZE {
            return Err(EngineError::MalformedQuery(format!(
                "query of {total} bytes exceeds maximum {MAX_FIELD_SIZE}"
            )));
        }
        let query_size = u32::try_from(total)
            .map_err(|_| EngineError::MalformedQuery(format!("query of {total} bytes too large")))?;

        let mut query_for_leader = vec![0u8; total];
        fill_random(&mut query_for_leader)?;

        let mut query_for_follower = query_for_leader.clone();
        let offset = local_index as usize * segment_len;
        xor_into(
            &mut query_for_follower[offset..offset + payload.len()],
            payload,
        );

        scratch.pending = Some(PendingWrite {
            local_index,
            leader_digest: Sha256::digest(&query_for_leader).into(),
            follower_digest: Sha256::digest(&query_for_follower).into(),
        });

        Ok(WriteQueryShares {
            query_for_leader,
            query_for_follower,
            query_size,
            payload_size: data_size,
        })
    }

    fn build_audit_shares(
        &self,
        slot: usize,
        local_index: u32,
        seed: &[u8; SEED_SIZE],
        query: &WriteQueryShares,
    ) -> Result<AuditShares, EngineError> {
        let mut scratch = self.lock_slot(slot)?;
        let pending = scratch
            .pending
            .take()
            .ok_or(EngineError::AuditWithoutQuery(slot))?;

        let leader_digest: [u8; 32] = Sha256::digest(&query.query_for_leader).into();
        let follower_digest: [u8; 32] = Sha256::digest(&query.query_for_follower).into();
        if pending.local_index != local_index
            || pending.leader_digest != leader_digest
            || pending.follower_digest != follower_digest
        {
            return Err(EngineError::AuditWithoutQuery(slot));
        }

        if query.query_for_leader.len() != query.query_size as usize
            || query.query_for_follower.len() != query.query_size as usize
        {
            return Err(EngineError::MalformedQuery(format!(
                "share lengths {} / {} do not match query size {}",
                query.query_for_leader.len(),
                query.query_for_follower.len(),
                query.query_size
            )));
        }

        Ok(AuditShares {
            share_a: Self::audit_sketch(seed, &query.query_for_leader, query.payload_size),
            share_b: Self::audit_sketch(seed, &query.query_for_follower, query.payload_size),
        })
    }

    fn query_len_with(&self, local_index: u32, data_size: u32) -> u64 {
        let rows = u64::from(self.num_rows()).max(u64::from(local_index) + 1);
        rows * u64::from(data_size)
    }

    fn record_address(
        &self,
        local_index: u32,
        address: VirtualAddress,
    ) -> Result<(), EngineError> {
        let mut rows = self
            .rows
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        rows.addresses.insert(local_index, address);
        rows.num_rows = rows.num_rows.max(local_index.saturating_add(1));
        Ok(())
    }
}

fn fill_random(buf: &mut [u8]) -> Result<(), EngineError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| EngineError::Randomness(e.to_string()))
}

fn row_mask(seed: &[u8; SEED_SIZE], row: u32) -> [u8; 32] {
    Sha256::new()
        .chain_update(AUDIT_DOMAIN)
        .chain_update(seed)
        .chain_update(row.to_le_bytes())
        .finalize()
        .into()
}

fn fold_segment(segment: &[u8]) -> [u8; FOLD_SIZE] {
    let mut folded = [0u8; FOLD_SIZE];
    for chunk in segment.chunks(FOLD_SIZE) {
        xor_into(&mut folded, chunk);
    }
    folded
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}
