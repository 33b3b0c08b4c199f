//! Shared-secret message cipher.
//!
//! ChaCha20-Poly1305 keyed by SHA-256(secret) with an all-zero nonce: every
//! participant derives the same key from the same passphrase and the output
//! is deterministic. Equal plaintexts under one secret produce equal
//! ciphertexts; the nonce is never varied.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use sha2::{Digest, Sha256};

use crate::error::CipherError;

const FIXED_NONCE: [u8; 12] = [0u8; 12];

/// Key derived from a passphrase.
#[derive(Clone)]
pub struct SharedSecret {
    key: [u8; 32],
}

impl SharedSecret {
    pub fn new(secret: &str) -> Self {
        Self { key: Sha256::digest(secret.as_bytes()).into() }
    }

    fn aead(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CipherError> {
        self.aead()
            .encrypt(Nonce::from_slice(&FIXED_NONCE), plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<String, CipherError> {
        let plain = self
            .aead()
            .decrypt(Nonce::from_slice(&FIXED_NONCE), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plain).map_err(|_| CipherError::Utf8)
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

pub fn encrypt(plaintext: &str, secret: &str) -> Result<Vec<u8>, CipherError> {
    SharedSecret::new(secret).encrypt(plaintext)
}

pub fn decrypt(ciphertext: &[u8], secret: &str) -> Result<String, CipherError> {
    SharedSecret::new(secret).decrypt(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let long = "a".repeat(500);
        for (m, s) in [("", "k"), ("hello", "secret"), ("héllo wörld ✓", ""), (long.as_str(), "x")] {
            let ct = encrypt(m, s).unwrap();
            assert_eq!(decrypt(&ct, s).unwrap(), m);
        }
    }

    #[test]
    fn deterministic() {
        assert_eq!(encrypt("same", "key").unwrap(), encrypt("same", "key").unwrap());
    }

    #[test]
    fn wrong_secret_fails() {
        let ct = encrypt("private", "alice-and-bob").unwrap();
        assert_eq!(decrypt(&ct, "mallory"), Err(CipherError::Decrypt));
    }

    #[test]
    fn corrupted_ciphertext_fails() {
        let mut ct = encrypt("private", "k").unwrap();
        ct[0] ^= 1;
        assert_eq!(decrypt(&ct, "k"), Err(CipherError::Decrypt));
        assert_eq!(decrypt(&[], "k"), Err(CipherError::Decrypt));
    }

    #[test]
    fn debug_hides_key() {
        assert_eq!(format!("{:?}", SharedSecret::new("k")), "SharedSecret(..)");
    }
}
