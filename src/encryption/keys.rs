//! Process-wide key material.

use std::fmt;

use crypto_box::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use super::KEY_SIZE;
use crate::common::error::{ClientError, Result};

/// The client's long-term box key. Lives for the whole process.
pub struct ClientIdentity {
    secret: SecretKey,
}

impl ClientIdentity {
    /// Generate a fresh identity from the OS random source.
    pub fn generate() -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng
            .try_fill_bytes(&mut bytes[..])
            .map_err(|e| ClientError::Entropy(e.to_string()))?;
        Ok(Self::from_bytes(*bytes))
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            secret: SecretKey::from(bytes),
        }
    }

    /// Parse a hex-encoded 32-byte secret key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        hex::decode_to_slice(hex_key.trim(), &mut bytes[..])
            .map_err(|e| ClientError::Config(format!("invalid client secret key: {e}")))?;
        Ok(Self::from_bytes(*bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().as_bytes())
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientIdentity(public={})", self.public_key_hex())
    }
}

/// Public keys of the other protocol roles.
#[derive(Clone)]
pub struct PeerPublicKeys {
    /// Recipient of every sealed share.
    pub follower: PublicKey,
    /// Reserved for a third auditor role; no exchange uses it yet.
    pub auditor: Option<PublicKey>,
}

impl PeerPublicKeys {
    pub fn new(follower: PublicKey) -> Self {
        Self {
            follower,
            auditor: None,
        }
    }

    pub fn with_auditor(mut self, auditor: PublicKey) -> Self {
        self.auditor = Some(auditor);
        self
    }
}

impl fmt::Debug for PeerPublicKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerPublicKeys")
            .field("follower", &hex::encode(self.follower.as_bytes()))
            .field(
                "auditor",
                &self.auditor.as_ref().map(|k| hex::encode(k.as_bytes())),
            )
            .finish()
    }
}

/// Parse a hex-encoded 32-byte public key.
pub fn parse_public_key(hex_key: &str) -> Result<PublicKey> {
    let mut bytes = [0u8; KEY_SIZE];
    hex::decode_to_slice(hex_key.trim(), &mut bytes)
        .map_err(|e| ClientError::Config(format!("invalid public key {hex_key:?}: {e}")))?;
    Ok(PublicKey::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_identity_roundtrips_public_key() {
        let secret_hex = "63".repeat(32);
        let a = ClientIdentity::from_hex(&secret_hex).unwrap();
        let b = ClientIdentity::from_hex(&secret_hex).unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        assert_eq!(parse_public_key(&a.public_key_hex()).unwrap(), a.public_key());
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!(matches!(
            ClientIdentity::from_hex("abcd"),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(parse_public_key("zz"), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_debug_never_prints_secret() {
        let secret_hex = "ab".repeat(32);
        let identity = ClientIdentity::from_hex(&secret_hex).unwrap();
        assert!(!format!("{:?}", identity).contains(&secret_hex));
    }

    #[test]
    fn test_generated_identities_differ() {
        let a = ClientIdentity::generate().unwrap();
        let b = ClientIdentity::generate().unwrap();
        assert_ne!(a.public_key_hex(), b.public_key_hex());
    }
}
