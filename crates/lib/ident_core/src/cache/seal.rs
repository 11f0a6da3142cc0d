//! AES-256-GCM sealing for cached values.
//!
//! Sealed form is `nonce || ciphertext || tag` with a random 12-byte nonce.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Nonce size for AES-256-GCM (12 bytes).
const NONCE_SIZE: usize = 12;
/// GCM tag size (16 bytes).
const TAG_SIZE: usize = 16;

#[derive(Clone)]
pub struct Sealer {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sealer")
    }
}

impl Sealer {
    /// Key the cipher with SHA-256 of `passphrase`.
    pub fn new(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(Error::config("cache sealer", "encryption key is empty"));
        }
        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::config("cache sealer", format!("key init failed: {e}")))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| Error::internal("seal", format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::internal("open", "sealed value too short"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::internal("open", format!("decryption failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let sealer = Sealer::new("test-encryption-key").unwrap();
        let sealed = sealer.seal(b"client record").unwrap();
        assert_ne!(&sealed[NONCE_SIZE..], b"client record");
        assert_eq!(sealer.open(&sealed).unwrap(), b"client record");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = Sealer::new("correct-key").unwrap().seal(b"secret").unwrap();
        assert!(Sealer::new("wrong-key").unwrap().open(&sealed).is_err());
    }

    #[test]
    fn nonces_differ() {
        let sealer = Sealer::new("k").unwrap();
        assert_ne!(sealer.seal(b"x").unwrap(), sealer.seal(b"x").unwrap());
    }

    #[test]
    fn truncated_value_is_rejected() {
        let sealer = Sealer::new("k").unwrap();
        assert!(sealer.open(&[0u8; 10]).is_err());
    }

    #[test]
    fn empty_key_is_a_config_error() {
        assert!(Sealer::new("").is_err());
    }
}
