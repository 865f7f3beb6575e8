//! # Wire Messages
//!
//! Binary messages exchanged with the leader and follower. All multi-byte
//! integers are little-endian `u32`.
//!
//! ```text
//! NewRow         client -> server  opcode(1)=0 count(4)=1 dataSize(4) rowKey(16)
//! NewRowReply    leader -> client  localIndex(4) virtualAddress(16)
//! Write          client -> leader  opcode(1)=1 querySize(4) dataSize(4) queryLeader(querySize)
//!                                  sealedLen(4) sealedQueryFollower(sealedLen)
//! AuditSeed      leader -> client  seed(16)
//! AuditSubmit    client -> leader  shareA(160) sealedLen(4) sealedShareB(sealedLen)
//! WriteComplete  leader -> client  statusCode(4)
//! ```
//!
//! Every variable-length trailing field carries its own length prefix, so a
//! reader never has to infer a field boundary from the end of the stream.
//!
//! Each message has an `encode` for the sending side and a `read_from` for
//! the receiving side. The client only ever reads the server replies; the
//! request readers exist for server implementations and test harnesses.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

use super::connection::Connection;
use super::error::{ClientError, Result};

// ============================================================================
// SIZES
// ============================================================================

pub const ROW_KEY_SIZE: usize = 16;
pub const ADDRESS_SIZE: usize = 16;
pub const SEED_SIZE: usize = 16;
pub const AUDIT_SHARE_SIZE: usize = 160;

/// Upper bound on any length-prefixed field a reader will accept (512 MiB).
pub const MAX_FIELD_SIZE: usize = 512 * 1024 * 1024;

/// Server-assigned identifier used for out-of-band retrieval.
pub type VirtualAddress = [u8; ADDRESS_SIZE];

/// Status code the leader sends when a write passed its audit.
pub const STATUS_OK: u32 = 0;

// ============================================================================
// OPCODES
// ============================================================================

/// First byte of every client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    NewRow = 0,
    Write = 1,
}

impl TryFrom<u8> for Opcode {
    type Error = ClientError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Opcode::NewRow),
            1 => Ok(Opcode::Write),
            other => Err(ClientError::Protocol(format!("unknown opcode {other}"))),
        }
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

/// **NewRow**: registers one row with a server.
#[derive(Clone, PartialEq, Eq)]
pub struct NewRow {
    pub count: u32,
    pub data_size: u32,
    pub row_key: [u8; ROW_KEY_SIZE],
}

impl NewRow {
    pub const ENCODED_LEN: usize = 1 + 4 + 4 + ROW_KEY_SIZE;

    /// A single-row registration, the only kind the client sends.
    pub fn single(data_size: u32, row_key: [u8; ROW_KEY_SIZE]) -> Self {
        Self {
            count: 1,
            data_size,
            row_key,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        buf.push(Opcode::NewRow as u8);
        buf.extend_from_slice(&self.count.to_le_bytes());
        buf.extend_from_slice(&self.data_size.to_le_bytes());
        buf.extend_from_slice(&self.row_key);
        buf
    }

    /// Read the body of a NewRow whose opcode byte was already consumed.
    pub async fn read_body<S>(conn: &mut Connection<S>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let count = conn.read_u32().await?;
        let data_size = conn.read_u32().await?;
        let row_key = conn.read_array::<ROW_KEY_SIZE>().await?;
        Ok(Self {
            count,
            data_size,
            row_key,
        })
    }
}

impl fmt::Debug for NewRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewRow")
            .field("count", &self.count)
            .field("data_size", &self.data_size)
            .finish_non_exhaustive()
    }
}

/// **NewRowReply**: the leader's allocation for a new mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRowReply {
    pub local_index: u32,
    pub virtual_address: VirtualAddress,
}

impl NewRowReply {
    pub const ENCODED_LEN: usize = 4 + ADDRESS_SIZE;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        buf.extend_from_slice(&self.local_index.to_le_bytes());
        buf.extend_from_slice(&self.virtual_address);
        buf
    }

    pub async fn read_from<S>(conn: &mut Connection<S>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let local_index = conn.read_u32().await?;
        let virtual_address = conn.read_array::<ADDRESS_SIZE>().await?;
        Ok(Self {
            local_index,
            virtual_address,
        })
    }
}

/// **Write**: round one of a write, the committed query shares.
#[derive(Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub data_size: u32,
    pub query_for_leader: Vec<u8>,
    /// Follower's query share, sealed for the follower.
    pub sealed_query_for_follower: Vec<u8>,
}

impl WriteRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let query_size = field_len(&self.query_for_leader)?;
        let sealed_len = field_len(&self.sealed_query_for_follower)?;

        let mut buf = Vec::with_capacity(
            1 + 4 + 4 + self.query_for_leader.len() + 4 + self.sealed_query_for_follower.len(),
        );
        buf.push(Opcode::Write as u8);
        buf.extend_from_slice(&query_size.to_le_bytes());
        buf.extend_from_slice(&self.data_size.to_le_bytes());
        buf.extend_from_slice(&self.query_for_leader);
        buf.extend_from_slice(&sealed_len.to_le_bytes());
        buf.extend_from_slice(&self.sealed_query_for_follower);
        Ok(buf)
    }

    /// Read the body of a Write whose opcode byte was already consumed.
    pub async fn read_body<S>(conn: &mut Connection<S>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let query_size = read_field_len(conn).await?;
        let data_size = conn.read_u32().await?;
        let query_for_leader = conn.read_exact(query_size).await?;
        let sealed_len = read_field_len(conn).await?;
        let sealed_query_for_follower = conn.read_exact(sealed_len).await?;
        Ok(Self {
            data_size,
            query_for_leader,
            sealed_query_for_follower,
        })
    }
}

impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRequest")
            .field("data_size", &self.data_size)
            .field("query_size", &self.query_for_leader.len())
            .field("sealed_len", &self.sealed_query_for_follower.len())
            .finish()
    }
}

/// **AuditSeed**: the leader's challenge, chosen after the query arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditSeed(pub [u8; SEED_SIZE]);

impl AuditSeed {
    pub fn encode(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub async fn read_from<S>(conn: &mut Connection<S>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(Self(conn.read_array::<SEED_SIZE>().await?))
    }
}

/// **AuditSubmit**: round two of a write.
#[derive(Clone, PartialEq, Eq)]
pub struct AuditSubmit {
    pub share_a: [u8; AUDIT_SHARE_SIZE],
    /// Follower's audit share, sealed for the follower.
    pub sealed_share_b: Vec<u8>,
}

impl AuditSubmit {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let sealed_len = field_len(&self.sealed_share_b)?;

        let mut buf = Vec::with_capacity(AUDIT_SHARE_SIZE + 4 + self.sealed_share_b.len());
        buf.extend_from_slice(&self.share_a);
        buf.extend_from_slice(&sealed_len.to_le_bytes());
        buf.extend_from_slice(&self.sealed_share_b);
        Ok(buf)
    }

    pub async fn read_from<S>(conn: &mut Connection<S>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let share_a = conn.read_array::<AUDIT_SHARE_SIZE>().await?;
        let sealed_len = read_field_len(conn).await?;
        let sealed_share_b = conn.read_exact(sealed_len).await?;
        Ok(Self {
            share_a,
            sealed_share_b,
        })
    }
}

impl fmt::Debug for AuditSubmit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditSubmit")
            .field("sealed_len", &self.sealed_share_b.len())
            .finish_non_exhaustive()
    }
}

/// **WriteComplete**: the leader's verdict on the audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteComplete {
    pub status: u32,
}

impl WriteComplete {
    pub fn encode(&self) -> Vec<u8> {
        self.status.to_le_bytes().to_vec()
    }

    pub async fn read_from<S>(conn: &mut Connection<S>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(Self {
            status: conn.read_u32().await?,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn field_len(field: &[u8]) -> Result<u32> {
    if field.len() > MAX_FIELD_SIZE {
        return Err(ClientError::InvalidInput(format!(
            "field of {} bytes exceeds maximum {}",
            field.len(),
            MAX_FIELD_SIZE
        )));
    }
    Ok(field.len() as u32)
}

async fn read_field_len<S>(conn: &mut Connection<S>) -> Result<usize>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let len = conn.read_u32().await? as usize;
    if len > MAX_FIELD_SIZE {
        return Err(ClientError::Protocol(format!(
            "field length {len} exceeds maximum {MAX_FIELD_SIZE}"
        )));
    }
    Ok(len)
}
