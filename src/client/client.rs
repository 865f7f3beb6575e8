//! # Client Core
//!
//! [`ClientCore`] runs the two protocols of the mailbox client:
//!
//! ## Registration ("add mailbox")
//!
//! 1. Check out an engine slot and open sessions to leader **and** follower
//! 2. Ask the engine for a pair of row keys
//! 3. Send `NewRow` with each server's key
//! 4. Read the leader's `NewRowReply` (local index + virtual address)
//! 5. Record the mailbox locally and tell the engine its address
//!
//! The follower receives its key but replies with nothing. Nothing is
//! recorded unless the leader's reply arrived.
//!
//! ## Write with audit
//!
//! 1. Check out an engine slot and build the query shares (oversized
//!    payloads fail here, before any traffic)
//! 2. Open a session to the **leader only**
//! 3. Send `Write`: the leader's share in the clear, the follower's share
//!    sealed for the follower
//! 4. Read the leader's 16-byte audit seed
//! 5. Build the audit shares from the seed and send `AuditSubmit`, again
//!    with the follower's half sealed
//! 6. Read `WriteComplete`; a nonzero status is a failed write
//!
//! The seed is only requested after the query is on the wire, so the client
//! is committed to its query before it learns the challenge.
//!
//! Every operation opens fresh sessions and drops them on exit. An error
//! aborts only the operation that hit it.

use std::time::Duration;

use log::{info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::client::registry::{Mailbox, MailboxRegistry};
use crate::common::connection::{Connection, Dialer, DEFAULT_IO_TIMEOUT};
use crate::common::error::{ClientError, Result};
use crate::common::messages::{
    AuditSeed, AuditSubmit, NewRow, NewRowReply, WriteComplete, WriteRequest, MAX_FIELD_SIZE,
};
use crate::encryption::{seal, ClientIdentity, PeerPublicKeys};
use crate::engine::ShareEngine;

/// Largest mailbox a registration accepts.
pub const MAX_DATA_SIZE: u32 = 65536;

/// Where the two servers listen.
#[derive(Debug, Clone)]
pub struct ServerPair {
    pub leader: String,
    pub follower: String,
}

/// Protocol orchestrator shared by all in-flight operations.
///
/// Owns everything an operation needs: the dialer for both servers, the
/// share engine, the client's box identity, the follower's public key and
/// the mailbox registry with its slot pool. Share it behind an `Arc`;
/// every method takes `&self`.
///
/// # Fields
///
/// * `client_name` - Name used in log lines
/// * `servers` - Leader and follower addresses
/// * `io_timeout` - Deadline for each read or write on a session
pub struct ClientCore<D, E> {
    client_name: String,
    servers: ServerPair,
    dialer: D,
    engine: E,
    identity: ClientIdentity,
    peers: PeerPublicKeys,
    registry: MailboxRegistry,
    io_timeout: Duration,
}

impl<D, E> ClientCore<D, E>
where
    D: Dialer,
    E: ShareEngine,
{
    /// Creates a new `ClientCore`.
    ///
    /// # Arguments
    ///
    /// * `client_name` - Name used in log lines
    /// * `servers` - Leader and follower addresses (`host:port`)
    /// * `dialer` - Opens the byte stream to each server
    /// * `engine` - Share engine; its slot count sizes the slot pool
    /// * `identity` - The client's long-term box key
    /// * `peers` - Public keys of the follower (and optional auditor)
    ///
    /// # Returns
    ///
    /// A core with an empty registry and the default I/O timeout
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let core = ClientCore::new(
    ///     "Client1".to_string(),
    ///     config.server_pair(),
    ///     TlsDialer::from_pem_file("config/ca.pem", None, DEFAULT_CONNECT_TIMEOUT)?,
    ///     LinearShareEngine::new(8, 0),
    ///     ClientIdentity::generate()?,
    ///     config.peer_keys()?,
    /// );
    /// ```
    pub fn new(
        client_name: String,
        servers: ServerPair,
        dialer: D,
        engine: E,
        identity: ClientIdentity,
        peers: PeerPublicKeys,
    ) -> Self {
        let registry = MailboxRegistry::new(engine.num_slots());
        Self {
            client_name,
            servers,
            dialer,
            engine,
            identity,
            peers,
            registry,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Replaces the per-call read/write deadline.
    ///
    /// # Arguments
    ///
    /// * `io_timeout` - Deadline applied to every read, write and shutdown
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Registered mailboxes and the engine slot pool.
    pub fn registry(&self) -> &MailboxRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Creates a mailbox of `data_size` bytes on the server pair.
    ///
    /// Opens sessions to both servers, sends each its row key and records
    /// the leader's allocation. Nothing is recorded unless every step
    /// succeeded.
    ///
    /// # Arguments
    ///
    /// * `data_size` - Mailbox size in bytes, `1..=MAX_DATA_SIZE`
    ///
    /// # Returns
    ///
    /// * `Ok(Mailbox)` - The leader's local index and virtual address
    /// * `Err(ClientError::InvalidInput)` - `data_size` out of range, before any traffic
    /// * `Err(ClientError::Protocol)` - The leader's index is already taken, or
    ///   would grow write queries past the wire limit
    /// * `Err(_)` - Connection, transport or engine failure
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let mailbox = core.register_mailbox(1024).await?;
    /// core.write_mailbox(mailbox.local_index, b"hello").await?;
    /// ```
    pub async fn register_mailbox(&self, data_size: u32) -> Result<Mailbox> {
        if data_size == 0 || data_size > MAX_DATA_SIZE {
            return Err(ClientError::InvalidInput(format!(
                "data size {data_size} outside 1..={MAX_DATA_SIZE}"
            )));
        }

        let _slot = self.registry.allocate_slot().await?;

        let (mut leader, mut follower) = tokio::try_join!(
            Connection::open(&self.dialer, &self.servers.leader, self.io_timeout),
            Connection::open(&self.dialer, &self.servers.follower, self.io_timeout),
        )?;
        info!(
            "{} connected to leader {} and follower {}",
            self.client_name, self.servers.leader, self.servers.follower
        );

        let keys = self.engine.new_row_keys(data_size)?;
        let to_leader = NewRow::single(data_size, keys.key_for_leader).encode();
        let to_follower = NewRow::single(data_size, keys.key_for_follower).encode();
        drop(keys);

        tokio::try_join!(leader.write_all(&to_leader), follower.write_all(&to_follower))?;

        let reply = NewRowReply::read_from(&mut leader).await?;
        let mailbox = Mailbox {
            local_index: reply.local_index,
            virtual_address: reply.virtual_address,
            data_size,
        };

        self.check_query_bound(mailbox.local_index, data_size)?;
        self.registry.record(mailbox)?;
        if let Err(e) = self
            .engine
            .record_address(mailbox.local_index, mailbox.virtual_address)
        {
            self.registry.remove(mailbox.local_index);
            return Err(e.into());
        }

        close_quietly(leader).await;
        close_quietly(follower).await;

        info!(
            "✅ {} registered mailbox #{} at {}",
            self.client_name,
            mailbox.local_index,
            mailbox.address_hex()
        );
        Ok(mailbox)
    }

    /// Writes `payload` into the mailbox at `local_index`.
    ///
    /// The payload is zero-padded to the mailbox's data size; a longer
    /// payload fails with [`ClientError::Engine`] before anything is sent.
    ///
    /// # Arguments
    ///
    /// * `local_index` - Index returned by [`register_mailbox`](Self::register_mailbox)
    /// * `payload` - At most the mailbox's data size in bytes
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The leader accepted the audit and reported status 0
    /// * `Err(ClientError::UnknownMailbox)` - No such mailbox, before any traffic
    /// * `Err(ClientError::Engine)` - Payload too large or query too big, before any traffic
    /// * `Err(ClientError::WriteRejected)` - The leader reported a nonzero status
    /// * `Err(_)` - Connection, transport or sealing failure
    ///
    /// Concurrent writes to the same mailbox are not ordered against each
    /// other. Which one the servers keep is undefined; callers that care
    /// must serialize them.
    pub async fn write_mailbox(&self, local_index: u32, payload: &[u8]) -> Result<()> {
        let mailbox = self.registry.lookup(local_index)?;
        let slot = self.registry.allocate_slot().await?;

        let mut data = payload.to_vec();
        if data.len() < mailbox.data_size as usize {
            data.resize(mailbox.data_size as usize, 0);
        }
        let query = self.engine.build_write_query(
            slot.id(),
            local_index,
            &data,
            mailbox.data_size,
        )?;

        let mut leader =
            Connection::open(&self.dialer, &self.servers.leader, self.io_timeout).await?;
        info!(
            "📤 {} writing mailbox #{} via leader {} (query {} bytes)",
            self.client_name, local_index, self.servers.leader, query.query_size
        );

        // round one: commit to the query
        let request = WriteRequest {
            data_size: mailbox.data_size,
            query_for_leader: query.query_for_leader.clone(),
            sealed_query_for_follower: seal(
                &query.query_for_follower,
                &self.peers.follower,
                self.identity.secret_key(),
            )?,
        };
        leader.write_all(&request.encode()?).await?;

        // round two: answer the audit challenge
        let seed = AuditSeed::read_from(&mut leader).await?;
        let audit = self
            .engine
            .build_audit_shares(slot.id(), local_index, &seed.0, &query)?;
        let submit = AuditSubmit {
            share_a: audit.share_a,
            sealed_share_b: seal(
                &audit.share_b,
                &self.peers.follower,
                self.identity.secret_key(),
            )?,
        };
        leader.write_all(&submit.encode()?).await?;

        let done = WriteComplete::read_from(&mut leader).await?;
        close_quietly(leader).await;

        if !done.is_success() {
            return Err(ClientError::WriteRejected(done.status));
        }

        info!(
            "✅ {} write to mailbox #{} complete",
            self.client_name, local_index
        );
        Ok(())
    }
}

impl<D, E> ClientCore<D, E>
where
    E: ShareEngine,
{
    /// Refuse a leader index that would make any mailbox's write query larger
    /// than a wire field may be.
    fn check_query_bound(&self, local_index: u32, data_size: u32) -> Result<()> {
        let widest = data_size.max(self.registry.max_data_size());
        let query_len = self.engine.query_len_with(local_index, widest);
        if query_len > MAX_FIELD_SIZE as u64 {
            return Err(ClientError::Protocol(format!(
                "leader assigned local index {local_index}, which needs {query_len}-byte queries (maximum {MAX_FIELD_SIZE})"
            )));
        }
        Ok(())
    }
}

/// Shut a finished session down; the operation already succeeded, so a
/// failing close is only logged.
async fn close_quietly<S>(conn: Connection<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = conn.peer().to_owned();
    if let Err(e) = conn.shutdown().await {
        warn!("⚠️  closing session to {} failed: {}", peer, e);
    }
}
