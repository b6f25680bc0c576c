//! Per-entry encryption for the code archive.
//!
//! ChaCha20-Poly1305 keyed by the SHA-256 of a passphrase. The nonce of
//! each entry is derived from the module name, repeated to the nonce length,
//! so the reader can recompute it without storing anything per entry. The
//! authentication tag makes a wrong key fail loudly instead of yielding
//! garbage.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::ArchiveError;

pub const NONCE_LEN: usize = 12;

pub struct Cipher {
    aead: ChaCha20Poly1305,
}

impl Cipher {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        Self {
            aead: ChaCha20Poly1305::new(Key::from_slice(digest.as_slice())),
        }
    }

    /// Module name bytes, repeated until the nonce is full.
    pub fn nonce_for(name: &str) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        for (slot, byte) in nonce.iter_mut().zip(name.bytes().cycle()) {
            *slot = byte;
        }
        nonce
    }

    pub fn encrypt(&self, name: &str, plaintext: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        let nonce = Self::nonce_for(name);
        self.aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| ArchiveError::Decrypt {
                name: name.to_string(),
                reason: format!("encryption failed: {}", e),
            })
    }

    pub fn decrypt(&self, name: &str, ciphertext: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        let nonce = Self::nonce_for(name);
        self.aead
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| ArchiveError::Decrypt {
                name: name.to_string(),
                reason: "authentication failed (wrong key or corrupt entry)".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_repeats_name() {
        assert_eq!(&Cipher::nonce_for("abc"), b"abcabcabcabc");
        assert_eq!(&Cipher::nonce_for("a_very_long_module_name"), b"a_very_long_");
        assert_eq!(Cipher::nonce_for(""), [0u8; NONCE_LEN]);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealed = Cipher::from_passphrase("right").encrypt("m", b"payload").unwrap();
        assert_eq!(Cipher::from_passphrase("right").decrypt("m", &sealed).unwrap(), b"payload");
        assert!(matches!(
            Cipher::from_passphrase("wrong").decrypt("m", &sealed),
            Err(ArchiveError::Decrypt { .. })
        ));
    }

    #[test]
    fn test_nonce_binds_entry_name() {
        let cipher = Cipher::from_passphrase("k");
        let sealed = cipher.encrypt("alpha", b"payload").unwrap();
        assert!(cipher.decrypt("beta", &sealed).is_err());
    }
}
