//! # Secure Channel Layer
//!
//! Seals follower-bound shares so that only the follower can read them, even
//! though they travel through the leader.
//!
//! Envelopes use NaCl `box` (X25519 key agreement, XSalsa20-Poly1305):
//!
//! ```text
//! [nonce (24 bytes)][ciphertext + Poly1305 tag (16 bytes)]
//! ```
//!
//! The nonce is drawn fresh from the OS random source for every envelope and
//! is never derived from the content. The format is byte-compatible with
//! `box.Seal(nonce[:], msg, &nonce, peer, secret)` in Go's
//! `golang.org/x/crypto/nacl/box`.

pub mod keys;

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::SalsaBox;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::common::error::{ClientError, Result};

pub use crypto_box::{PublicKey, SecretKey};
pub use keys::{parse_public_key, ClientIdentity, PeerPublicKeys};

/// Size of X25519 public and secret keys.
pub const KEY_SIZE: usize = 32;

/// Size of the XSalsa20 nonce prepended to every envelope.
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag.
pub const TAG_SIZE: usize = 16;

/// Envelope length for a plaintext of `plaintext_len` bytes.
pub const fn sealed_len(plaintext_len: usize) -> usize {
    NONCE_SIZE + plaintext_len + TAG_SIZE
}

/// Seal `plaintext` for `recipient`, authenticated as `sender`.
///
/// # Errors
///
/// - [`ClientError::Entropy`] if no nonce could be drawn.
/// - [`ClientError::Seal`] if encryption fails.
pub fn seal(plaintext: &[u8], recipient: &PublicKey, sender: &SecretKey) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| ClientError::Entropy(e.to_string()))?;

    let salsa_box = SalsaBox::new(recipient, sender);
    let ciphertext = salsa_box
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|_| ClientError::Seal)?;

    let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Open an envelope sealed by `sender` for `recipient`.
///
/// Returns the exact plaintext or [`ClientError::Open`]; a tampered,
/// truncated or misaddressed envelope never yields partial output.
pub fn open(envelope: &[u8], sender: &PublicKey, recipient: &SecretKey) -> Result<Vec<u8>> {
    if envelope.len() < NONCE_SIZE + TAG_SIZE {
        return Err(ClientError::Open("envelope shorter than nonce and tag"));
    }
    let (nonce, ciphertext) = envelope.split_at(NONCE_SIZE);

    SalsaBox::new(sender, recipient)
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| ClientError::Open("authentication failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (ClientIdentity, PublicKey) {
        let identity = ClientIdentity::generate().unwrap();
        let public = identity.public_key();
        (identity, public)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (client_secret, client_public) = keypair();
        let (follower_secret, follower_public) = keypair();
        let share = vec![0x42u8; 160];

        let envelope = seal(&share, &follower_public, client_secret.secret_key()).unwrap();
        assert_eq!(envelope.len(), sealed_len(160));

        let opened = open(&envelope, &client_public, follower_secret.secret_key()).unwrap();
        assert_eq!(opened, share);
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let (client_secret, client_public) = keypair();
        let (_, follower_public) = keypair();
        let (leader_secret, _) = keypair();

        let envelope = seal(b"query share", &follower_public, client_secret.secret_key()).unwrap();
        let result = open(&envelope, &client_public, leader_secret.secret_key());
        assert!(matches!(result, Err(ClientError::Open(_))));
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let (client_secret, client_public) = keypair();
        let (follower_secret, follower_public) = keypair();

        let mut envelope = seal(b"query share", &follower_public, client_secret.secret_key()).unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;

        assert!(matches!(
            open(&envelope, &client_public, follower_secret.secret_key()),
            Err(ClientError::Open(_))
        ));
    }

    #[test]
    fn test_truncated_envelope_fails() {
        let (_, client_public) = keypair();
        let (follower_secret, _) = keypair();

        assert!(matches!(
            open(&[0u8; 30], &client_public, follower_secret.secret_key()),
            Err(ClientError::Open(_))
        ));
    }

    #[test]
    fn test_nonce_is_fresh_per_envelope() {
        let (client_secret, _) = keypair();
        let (_, follower_public) = keypair();

        let a = seal(b"same", &follower_public, client_secret.secret_key()).unwrap();
        let b = seal(b"same", &follower_public, client_secret.secret_key()).unwrap();
        assert_ne!(&a[..NONCE_SIZE], &b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_plaintext() {
        let (client_secret, client_public) = keypair();
        let (follower_secret, follower_public) = keypair();

        let envelope = seal(&[], &follower_public, client_secret.secret_key()).unwrap();
        assert_eq!(envelope.len(), NONCE_SIZE + TAG_SIZE);
        assert!(open(&envelope, &client_public, follower_secret.secret_key())
            .unwrap()
            .is_empty());
    }
}
