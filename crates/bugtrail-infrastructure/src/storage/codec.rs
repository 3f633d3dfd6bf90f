//! Payload transforms: gzip compression and AES-256-GCM encryption.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use bugtrail_core::{BugtrailError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

/// AES-GCM nonce length in bytes; the nonce is prefixed to every ciphertext.
pub const NONCE_LEN: usize = 12;
/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| BugtrailError::decode(format!("gzip: {e}")))?;
    Ok(out)
}

/// Symmetric authenticated cipher over a 256-bit key.
#[derive(Clone)]
pub struct Cipher {
    inner: Aes256Gcm,
}

impl Cipher {
    /// Generates a fresh random key, returning the cipher and the raw key bytes.
    pub fn generate() -> (Self, Vec<u8>) {
        let key = Aes256Gcm::generate_key(OsRng);
        let cipher = Self {
            inner: Aes256Gcm::new(&key),
        };
        (cipher, key.to_vec())
    }

    pub fn from_key(key: &[u8]) -> Result<Self> {
        let inner = Aes256Gcm::new_from_slice(key).map_err(|_| {
            BugtrailError::Crypto(format!(
                "invalid key length {} (expected {KEY_LEN})",
                key.len()
            ))
        })?;
        Ok(Self { inner })
    }

    /// Encrypts with a random nonce; output is `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .inner
            .encrypt(&nonce, plaintext)
            .map_err(|_| BugtrailError::Crypto("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() < NONCE_LEN {
            return Err(BugtrailError::Crypto("ciphertext shorter than nonce".to_string()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        self.inner
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| BugtrailError::Crypto("authentication failed".to_string()))
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher(..)")
    }
}
