//! # Mailbox Registry
//!
//! Client-local bookkeeping shared by every in-flight operation:
//!
//! - the `local index → Mailbox` map filled in by registrations, and
//! - the [`SlotPool`] that hands each registration or write its own engine
//!   slot for the duration of the call.
//!
//! Slots are returned when their [`SlotGuard`] is dropped, so a slot is
//! released on success, on error and on panic alike. With `K` slots, the
//! `K+1`-th concurrent operation waits until one frees up.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::common::error::{ClientError, Result};
use crate::common::messages::VirtualAddress;

/// A registered mailbox. Immutable once created.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Mailbox {
    pub local_index: u32,
    pub virtual_address: VirtualAddress,
    pub data_size: u32,
}

impl Mailbox {
    pub fn address_hex(&self) -> String {
        hex::encode(self.virtual_address)
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("local_index", &self.local_index)
            .field("virtual_address", &self.address_hex())
            .field("data_size", &self.data_size)
            .finish()
    }
}

// ============================================================================
// SLOT POOL
// ============================================================================

struct SlotPoolInner {
    permits: Arc<Semaphore>,
    free: Mutex<Vec<usize>>,
    capacity: usize,
}

/// Bounded pool of engine slot identifiers `0..capacity`.
#[derive(Clone)]
pub struct SlotPool {
    inner: Arc<SlotPoolInner>,
}

impl SlotPool {
    /// Pool holding slots `0..capacity`, all free.
    pub fn new(capacity: usize) -> Self {
        // pop() hands out low slots first
        let free = (0..capacity).rev().collect();
        Self {
            inner: Arc::new(SlotPoolInner {
                permits: Arc::new(Semaphore::new(capacity)),
                free: Mutex::new(free),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Slots not currently checked out.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Check out a slot, waiting if all of them are in use.
    pub async fn acquire(&self) -> Result<SlotGuard> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ClientError::SlotPoolClosed)?;

        // holding a permit guarantees a free entry
        let slot = self
            .inner
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .ok_or(ClientError::SlotPoolClosed)?;

        debug!("engine slot {} checked out", slot);
        Ok(SlotGuard {
            slot,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Stop handing out slots; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.inner.permits.close();
    }
}

/// Exclusive use of one engine slot.
pub struct SlotGuard {
    slot: usize,
    pool: Arc<SlotPoolInner>,
    // dropped after Drop::drop has returned the slot
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    pub fn id(&self) -> usize {
        self.slot
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pool
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(self.slot);
        debug!("engine slot {} released", self.slot);
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Thread-safe registry of mailboxes plus the slot pool.
pub struct MailboxRegistry {
    mailboxes: RwLock<HashMap<u32, Mailbox>>,
    slots: SlotPool,
}

impl MailboxRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `num_slots` - Engine slots to hand out; at most this many operations run at once
    pub fn new(num_slots: usize) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            slots: SlotPool::new(num_slots),
        }
    }

    pub fn slots(&self) -> &SlotPool {
        &self.slots
    }

    /// Check out an engine slot for one operation.
    pub async fn allocate_slot(&self) -> Result<SlotGuard> {
        self.slots.acquire().await
    }

    /// Record a new mailbox. A second mailbox under the same index means the
    /// leader allocated the index twice, which is a protocol violation.
    pub fn record(&self, mailbox: Mailbox) -> Result<()> {
        let mut mailboxes = self
            .mailboxes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = mailboxes.get(&mailbox.local_index) {
            return Err(ClientError::Protocol(format!(
                "leader assigned local index {} twice (already at {})",
                mailbox.local_index,
                existing.address_hex()
            )));
        }
        mailboxes.insert(mailbox.local_index, mailbox);
        Ok(())
    }

    /// Forget a mailbox, e.g. one whose registration failed after
    /// [`record`](Self::record). Returns the removed entry.
    pub fn remove(&self, local_index: u32) -> Option<Mailbox> {
        self.mailboxes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&local_index)
    }

    /// Largest data size among registered mailboxes (0 when empty).
    pub fn max_data_size(&self) -> u32 {
        self.mailboxes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(|m| m.data_size)
            .max()
            .unwrap_or(0)
    }

    pub fn lookup(&self, local_index: u32) -> Result<Mailbox> {
        self.mailboxes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&local_index)
            .copied()
            .ok_or(ClientError::UnknownMailbox(local_index))
    }

    pub fn len(&self) -> usize {
        self.mailboxes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
