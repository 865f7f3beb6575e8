//! # TLS Dialer
//!
//! Opens TLS sessions to the leader and follower. Server certificates are
//! verified against a configured trust root (PEM, one or more CA
//! certificates); there is no way to turn verification off.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use super::connection::Dialer;
use super::error::{ClientError, Result};

/// Default TCP connect + TLS handshake deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dials servers over TLS, verifying them against the configured roots.
#[derive(Clone)]
pub struct TlsDialer {
    connector: TlsConnector,
    /// Name to verify instead of the host part of the address
    server_name: Option<String>,
    connect_timeout: Duration,
}

impl TlsDialer {
    /// Build a dialer that trusts exactly the CA certificates in `ca_pem`.
    ///
    /// # Arguments
    ///
    /// * `ca_pem` - One or more PEM certificates used as trust roots
    /// * `server_name` - Name to verify instead of each address's host part
    /// * `connect_timeout` - Deadline for the TCP connect and, separately, the handshake
    ///
    /// # Errors
    ///
    /// `ClientError::Config` if `ca_pem` holds no usable certificate.
    pub fn new(ca_pem: &[u8], server_name: Option<String>, connect_timeout: Duration) -> Result<Self> {
        let certs = CertificateDer::pem_slice_iter(ca_pem)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ClientError::Config(format!("failed to parse CA certificates: {e}")))?;
        if certs.is_empty() {
            return Err(ClientError::Config("no CA certificates found".into()));
        }

        let mut roots = RootCertStore::empty();
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| ClientError::Config(format!("failed to add CA certificate: {e}")))?;
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ClientError::Config(format!("TLS config error: {e}")))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
            connect_timeout,
        })
    }

    /// Build a dialer from a CA bundle on disk.
    pub fn from_pem_file(
        path: impl AsRef<Path>,
        server_name: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|e| {
            ClientError::Config(format!("cannot read CA bundle {}: {e}", path.display()))
        })?;
        Self::new(&pem, server_name, connect_timeout)
    }

    fn name_for(&self, address: &str) -> Result<ServerName<'static>> {
        let host = match &self.server_name {
            Some(name) => name.as_str(),
            None => host_of(address),
        };
        ServerName::try_from(host.to_owned()).map_err(|e| ClientError::Connection {
            address: address.to_owned(),
            reason: format!("invalid server name {host:?}: {e}"),
        })
    }
}

impl Dialer for TlsDialer {
    type Stream = TlsStream<TcpStream>;

    async fn dial(&self, address: &str) -> Result<Self::Stream> {
        let server_name = self.name_for(address)?;

        let tcp = timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ClientError::Timeout {
                operation: "connect",
                timeout: self.connect_timeout,
            })?
            .map_err(|e| ClientError::Connection {
                address: address.to_owned(),
                reason: e.to_string(),
            })?;
        tcp.set_nodelay(true)?;

        let tls = timeout(self.connect_timeout, self.connector.connect(server_name, tcp))
            .await
            .map_err(|_| ClientError::Timeout {
                operation: "TLS handshake",
                timeout: self.connect_timeout,
            })?
            .map_err(|e| ClientError::Connection {
                address: address.to_owned(),
                reason: format!("TLS handshake failed: {e}"),
            })?;

        debug!("TLS session established with {}", address);
        Ok(tls)
    }
}

/// Host part of `host:port`, without IPv6 brackets.
fn host_of(address: &str) -> &str {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("leader.example:4442"), "leader.example");
        assert_eq!(host_of("127.0.0.1:4443"), "127.0.0.1");
        assert_eq!(host_of("[::1]:4442"), "::1");
        assert_eq!(host_of("localhost"), "localhost");
    }

    #[test]
    fn test_empty_bundle_rejected() {
        let err = TlsDialer::new(b"", None, DEFAULT_CONNECT_TIMEOUT).err().unwrap();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_server_name_override() {
        let ca = rcgen::generate_simple_self_signed(vec!["ca.test".to_string()]).unwrap();
        let dialer = TlsDialer::new(
            ca.cert.pem().as_bytes(),
            Some("leader.internal".into()),
            DEFAULT_CONNECT_TIMEOUT,
        )
        .unwrap();

        let name = dialer.name_for("10.0.0.1:4442").unwrap();
        assert_eq!(name.to_str(), "leader.internal");
    }
}
