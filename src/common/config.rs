//! # Configuration
//!
//! TOML configuration for the client binary, loaded with [`load_config`].
//!
//! ```toml
//! [client]
//! name = "Client1"
//!
//! [servers]
//! leader = "leader.example.net:4000"
//! follower = "follower.example.net:4001"
//! ca_cert = "config/ca.pem"
//!
//! [mailbox]
//! data_size = 1024
//! num_slots = 8
//!
//! [keys]
//! follower_public_key = "9f0c...e1"
//! ```

use std::fs;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::client::client::{ServerPair, MAX_DATA_SIZE};
use crate::common::error::ClientError;
use crate::encryption::{parse_public_key, ClientIdentity, PeerPublicKeys};

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Example
/// ```ignore
/// let config: ClientConfig = load_config("config/client.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client: ClientInfo,
    pub servers: ServersConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    pub keys: KeysConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Name used in log lines and metrics (e.g., "Client1")
    pub name: String,
}

/// The server pair every operation talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersConfig {
    /// `host:port` of the leader
    pub leader: String,
    /// `host:port` of the follower
    pub follower: String,
    /// Name checked against both certificates instead of each address's host
    #[serde(default)]
    pub server_name: Option<String>,
    /// PEM file with the CA certificate(s) that signed the server certificates
    pub ca_cert: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Size in bytes of every mailbox this client registers
    #[serde(default = "default_data_size")]
    pub data_size: u32,
    /// Engine slots, i.e. how many operations may run at once
    #[serde(default = "default_num_slots")]
    pub num_slots: usize,
    /// Rows the servers already hold from an earlier run
    #[serde(default)]
    pub num_existing_rows: u32,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            data_size: default_data_size(),
            num_slots: default_num_slots(),
            num_existing_rows: 0,
        }
    }
}

/// Hex-encoded 32-byte box keys.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    pub follower_public_key: String,
    /// Generated at startup when absent
    #[serde(default)]
    pub client_secret_key: Option<String>,
    #[serde(default)]
    pub auditor_public_key: Option<String>,
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysConfig")
            .field("follower_public_key", &self.follower_public_key)
            .field(
                "client_secret_key",
                &self.client_secret_key.as_ref().map(|_| "<redacted>"),
            )
            .field("auditor_public_key", &self.auditor_public_key)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            io_timeout_secs: default_io_timeout(),
        }
    }
}

fn default_data_size() -> u32 {
    1024
}

fn default_num_slots() -> usize {
    8
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_io_timeout() -> u64 {
    30
}

impl ClientConfig {
    /// Reject values that would only fail later, mid-operation.
    pub fn validate(&self) -> std::result::Result<(), ClientError> {
        if self.client.name.trim().is_empty() {
            return Err(ClientError::Config("client.name is empty".into()));
        }
        for (field, address) in [
            ("servers.leader", &self.servers.leader),
            ("servers.follower", &self.servers.follower),
        ] {
            if address.rsplit_once(':').map_or(true, |(host, port)| {
                host.is_empty() || port.parse::<u16>().is_err()
            }) {
                return Err(ClientError::Config(format!(
                    "{field} must be host:port, got {address:?}"
                )));
            }
        }
        if self.servers.ca_cert.trim().is_empty() {
            return Err(ClientError::Config("servers.ca_cert is empty".into()));
        }
        if self.mailbox.data_size == 0 || self.mailbox.data_size > MAX_DATA_SIZE {
            return Err(ClientError::Config(format!(
                "mailbox.data_size must be in 1..={MAX_DATA_SIZE}, got {}",
                self.mailbox.data_size
            )));
        }
        if self.mailbox.num_slots == 0 {
            return Err(ClientError::Config("mailbox.num_slots must be at least 1".into()));
        }
        if self.timeouts.connect_timeout_secs == 0 || self.timeouts.io_timeout_secs == 0 {
            return Err(ClientError::Config("timeouts must be at least 1 second".into()));
        }

        self.peer_keys()?;
        self.identity()?;
        Ok(())
    }

    pub fn server_pair(&self) -> ServerPair {
        ServerPair {
            leader: self.servers.leader.clone(),
            follower: self.servers.follower.clone(),
        }
    }

    pub fn peer_keys(&self) -> std::result::Result<PeerPublicKeys, ClientError> {
        let mut peers = PeerPublicKeys::new(parse_public_key(&self.keys.follower_public_key)?);
        if let Some(auditor) = &self.keys.auditor_public_key {
            peers = peers.with_auditor(parse_public_key(auditor)?);
        }
        Ok(peers)
    }

    /// The configured identity, or `None` when one should be generated.
    pub fn identity(&self) -> std::result::Result<Option<ClientIdentity>, ClientError> {
        self.keys
            .client_secret_key
            .as_deref()
            .map(ClientIdentity::from_hex)
            .transpose()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.io_timeout_secs)
    }
}
