//! Encryption of stored portal passwords
//!
//! Passwords are kept so the bot can log in again when the portal drops a
//! session. The stored form is opaque to the rest of the crate.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Reversible encryption for secrets at rest.
pub trait CredentialVault: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// `None` on any failure: bad format, wrong key, or tampered data.
    fn decrypt(&self, opaque: &str) -> Option<String>;
}

/// AES-256-GCM keyed by the SHA-256 of a configured secret.
///
/// Output is `hex(nonce):hex(ciphertext)`, with a fresh 96-bit nonce per call.
pub struct AesVault {
    cipher: Aes256Gcm,
}

impl AesVault {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Vault("vault secret must not be empty".to_string()));
        }
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }
}

impl CredentialVault for AesVault {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Vault(format!("encryption failed: {}", e)))?;
        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
    }

    fn decrypt(&self, opaque: &str) -> Option<String> {
        let (nonce_hex, ciphertext_hex) = opaque.split_once(':')?;
        let nonce_bytes = hex::decode(nonce_hex).ok()?;
        if nonce_bytes.len() != 12 {
            return None;
        }
        let ciphertext = hex::decode(ciphertext_hex).ok()?;
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| tracing::warn!("Stored credential could not be decrypted"))
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}
