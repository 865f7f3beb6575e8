//! Loopback leader/follower pair for protocol tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use mailbox_client::client::{ClientCore, ServerPair};
use mailbox_client::common::connection::{Connection, Dialer};
use mailbox_client::common::error::{ClientError, Result};
use mailbox_client::common::messages::{
    AuditSeed, AuditSubmit, NewRow, NewRowReply, Opcode, WriteComplete, WriteRequest,
};
use mailbox_client::encryption::{open, ClientIdentity, PeerPublicKeys, PublicKey};
use mailbox_client::engine::{LinearShareEngine, ShareEngine};

/// Plain TCP dialer that counts its dials.
#[derive(Clone, Default)]
pub struct TcpDialer {
    pub dials: Arc<AtomicUsize>,
}

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, address: &str) -> Result<TcpStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        TcpStream::connect(address)
            .await
            .map_err(|e| ClientError::Connection {
                address: address.to_owned(),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderBehavior {
    Honest,
    /// Run the full exchange, then answer with this status
    Reject(u32),
    /// Hang up right after reading the client's first message
    CloseEarly,
}

/// One write as the servers see it once both shares are combined.
#[derive(Debug, Clone)]
pub struct CombinedWrite {
    pub data_size: u32,
    pub vector: Vec<u8>,
}

impl CombinedWrite {
    pub fn segment(&self, row: u32) -> &[u8] {
        let len = self.data_size as usize;
        let start = row as usize * len;
        &self.vector[start..start + len]
    }
}

#[derive(Default)]
pub struct LeaderState {
    next_index: AtomicU32,
    pub addresses: Mutex<HashMap<u32, [u8; 16]>>,
    pub writes: Mutex<Vec<CombinedWrite>>,
    pub failed_audits: AtomicUsize,
}

#[derive(Default)]
pub struct FollowerState {
    pub row_keys: Mutex<Vec<[u8; 16]>>,
}

pub struct Harness {
    pub leader_address: String,
    pub follower_address: String,
    pub leader: Arc<LeaderState>,
    pub follower: Arc<FollowerState>,
    client_secret: [u8; 32],
    follower_public: PublicKey,
}

impl Harness {
    pub async fn start(behavior: LeaderBehavior) -> Self {
        Self::start_at(behavior, 0).await
    }

    /// Leader hands out local indices starting at `first_index`.
    pub async fn start_at(behavior: LeaderBehavior, first_index: u32) -> Self {
        let client_secret: [u8; 32] = rand::random();
        let follower_identity = ClientIdentity::generate().unwrap();
        let follower_public = follower_identity.public_key();
        let client_public = ClientIdentity::from_bytes(client_secret).public_key();

        let leader = Arc::new(LeaderState {
            next_index: AtomicU32::new(first_index),
            ..LeaderState::default()
        });
        let follower = Arc::new(FollowerState::default());

        let leader_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let follower_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let leader_address = leader_listener.local_addr().unwrap().to_string();
        let follower_address = follower_listener.local_addr().unwrap().to_string();

        let follower_identity = Arc::new(follower_identity);
        {
            let leader = leader.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = leader_listener.accept().await {
                    let state = leader.clone();
                    let identity = follower_identity.clone();
                    let client_public = client_public.clone();
                    tokio::spawn(async move {
                        let _ = serve_leader(stream, behavior, state, identity, client_public).await;
                    });
                }
            });
        }
        {
            let follower = follower.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = follower_listener.accept().await {
                    let state = follower.clone();
                    tokio::spawn(async move {
                        let _ = serve_follower(stream, state).await;
                    });
                }
            });
        }

        Self {
            leader_address,
            follower_address,
            leader,
            follower,
            client_secret,
            follower_public,
        }
    }

    pub fn client(&self, num_slots: usize) -> ClientCore<TcpDialer, LinearShareEngine> {
        self.client_with(num_slots, TcpDialer::default())
    }

    pub fn client_with(
        &self,
        num_slots: usize,
        dialer: TcpDialer,
    ) -> ClientCore<TcpDialer, LinearShareEngine> {
        self.client_with_engine(dialer, LinearShareEngine::new(num_slots, 0))
    }

    pub fn client_with_engine<E: ShareEngine>(
        &self,
        dialer: TcpDialer,
        engine: E,
    ) -> ClientCore<TcpDialer, E> {
        ClientCore::new(
            "TestClient".to_string(),
            ServerPair {
                leader: self.leader_address.clone(),
                follower: self.follower_address.clone(),
            },
            dialer,
            engine,
            ClientIdentity::from_bytes(self.client_secret),
            PeerPublicKeys::new(self.follower_public.clone()),
        )
        .with_io_timeout(Duration::from_secs(5))
    }

    pub fn writes(&self) -> Vec<CombinedWrite> {
        self.leader.writes.lock().unwrap().clone()
    }
}

/// An address nothing listens on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

async fn serve_leader(
    stream: TcpStream,
    behavior: LeaderBehavior,
    state: Arc<LeaderState>,
    follower: Arc<ClientIdentity>,
    client_public: PublicKey,
) -> Result<()> {
    let mut conn = Connection::new(stream, "client", Duration::from_secs(5));

    match Opcode::try_from(conn.read_u8().await?)? {
        Opcode::NewRow => {
            let _row = NewRow::read_body(&mut conn).await?;
            if behavior == LeaderBehavior::CloseEarly {
                return Ok(());
            }

            let local_index = state.next_index.fetch_add(1, Ordering::SeqCst);
            let mut virtual_address: [u8; 16] = rand::random();
            virtual_address[..4].copy_from_slice(&local_index.to_le_bytes());
            state
                .addresses
                .lock()
                .unwrap()
                .insert(local_index, virtual_address);

            let reply = NewRowReply {
                local_index,
                virtual_address,
            };
            conn.write_all(&reply.encode()).await?;
        }
        Opcode::Write => {
            let request = WriteRequest::read_body(&mut conn).await?;
            if behavior == LeaderBehavior::CloseEarly {
                return Ok(());
            }

            let seed: [u8; 16] = rand::random();
            conn.write_all(&AuditSeed(seed).encode()).await?;
            let submit = AuditSubmit::read_from(&mut conn).await?;

            let follower_secret = follower.secret_key();
            let query_for_follower =
                open(&request.sealed_query_for_follower, &client_public, follower_secret)?;
            let share_b = open(&submit.sealed_share_b, &client_public, follower_secret)?;

            let audit_ok = submit.share_a
                == LinearShareEngine::audit_sketch(&seed, &request.query_for_leader, request.data_size)
                && share_b[..]
                    == LinearShareEngine::audit_sketch(&seed, &query_for_follower, request.data_size)[..]
                && request.query_for_leader.len() == query_for_follower.len();

            let status = match behavior {
                LeaderBehavior::Reject(status) => status,
                _ if audit_ok => 0,
                _ => {
                    state.failed_audits.fetch_add(1, Ordering::SeqCst);
                    1
                }
            };

            if status == 0 {
                let vector = request
                    .query_for_leader
                    .iter()
                    .zip(&query_for_follower)
                    .map(|(l, f)| l ^ f)
                    .collect();
                state.writes.lock().unwrap().push(CombinedWrite {
                    data_size: request.data_size,
                    vector,
                });
            }
            conn.write_all(&WriteComplete { status }.encode()).await?;
        }
    }

    // wait for the client to hang up
    let _ = conn.read_u8().await;
    Ok(())
}

async fn serve_follower(stream: TcpStream, state: Arc<FollowerState>) -> Result<()> {
    let mut conn = Connection::new(stream, "client", Duration::from_secs(5));
    if let Opcode::NewRow = Opcode::try_from(conn.read_u8().await?)? {
        let row = NewRow::read_body(&mut conn).await?;
        state.row_keys.lock().unwrap().push(row.row_key);
    }
    let _ = conn.read_u8().await;
    Ok(())
}
