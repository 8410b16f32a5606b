//! Encryption of stored credentials
//!
//! Secrets are encrypted explicitly at the persistence boundary with
//! AES-256-GCM: callers hand plaintext to [`SecretVault::encrypt`] and store
//! the returned [`StoredSecret`], and only [`SecretVault::decrypt`] turns it
//! back into a [`SecretString`].

use crate::config::VaultConfig;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Refusing to encrypt an empty secret")]
    EmptyPlaintext,

    #[error("Secret was encrypted with key {stored}, vault holds key {current}")]
    KeyMismatch { stored: String, current: String },

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

/// Encrypted secret as persisted; all fields hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSecret {
    pub ciphertext: String,
    pub nonce: String,
    /// Fingerprint of the key that produced the ciphertext
    pub key_id: String,
}

pub struct SecretVault {
    cipher: Aes256Gcm,
    key_id: String,
}

impl SecretVault {
    pub fn new(key: &[u8]) -> Result<Self, VaultError> {
        if key.len() != KEY_LEN {
            return Err(VaultError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let digest = Sha256::digest(key);
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            key_id: hex::encode(&digest[..8]),
        })
    }

    pub fn from_hex(key: &str) -> Result<Self, VaultError> {
        let bytes = hex::decode(key.trim()).map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        Self::new(&bytes)
    }

    /// Load the key named by `config.key_env`
    pub fn from_env(config: &VaultConfig) -> Result<Self, VaultError> {
        let key = std::env::var(&config.key_env)
            .map_err(|_| VaultError::InvalidKey(format!("{} is not set", config.key_env)))?;
        let vault = Self::from_hex(&key)?;
        info!("Secret vault loaded: key_id={}", vault.key_id);
        Ok(vault)
    }

    /// Fresh random key, hex encoded
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        hex::encode(key)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<StoredSecret, VaultError> {
        if plaintext.is_empty() {
            return Err(VaultError::EmptyPlaintext);
        }

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptionFailed)?;

        Ok(StoredSecret {
            ciphertext: hex::encode(ciphertext),
            nonce: hex::encode(nonce),
            key_id: self.key_id.clone(),
        })
    }

    pub fn decrypt(&self, stored: &StoredSecret) -> Result<SecretString, VaultError> {
        if stored.key_id != self.key_id {
            return Err(VaultError::KeyMismatch {
                stored: stored.key_id.clone(),
                current: self.key_id.clone(),
            });
        }

        let nonce = hex::decode(&stored.nonce)
            .map_err(|e| VaultError::DecryptionFailed(format!("nonce: {}", e)))?;
        if nonce.len() != NONCE_LEN {
            return Err(VaultError::DecryptionFailed(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce.len()
            )));
        }
        let ciphertext = hex::decode(&stored.ciphertext)
            .map_err(|e| VaultError::DecryptionFailed(format!("ciphertext: {}", e)))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| VaultError::DecryptionFailed("authentication failed".to_string()))?;
        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| VaultError::DecryptionFailed("invalid UTF-8".to_string()))?;

        Ok(SecretString::new(plaintext))
    }

    /// Re-encrypt `stored` under `next`
    pub fn rotate(
        &self,
        stored: &StoredSecret,
        next: &SecretVault,
    ) -> Result<StoredSecret, VaultError> {
        use secrecy::ExposeSecret;

        let plaintext = self.decrypt(stored)?;
        let rotated = next.encrypt(plaintext.expose_secret())?;
        info!("Secret rotated: from={}, to={}", self.key_id, next.key_id);
        Ok(rotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn vault() -> SecretVault {
        SecretVault::from_hex(&SecretVault::generate_key()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let vault = vault();
        let stored = vault.encrypt("sk-live-123").unwrap();
        assert!(!stored.ciphertext.contains("sk-live"));
        assert_eq!(vault.decrypt(&stored).unwrap().expose_secret(), "sk-live-123");
    }

    #[test]
    fn test_nonces_differ() {
        let vault = vault();
        let a = vault.encrypt("same").unwrap();
        let b = vault.encrypt("same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(vault().encrypt(""), Err(VaultError::EmptyPlaintext)));
    }

    #[test]
    fn test_wrong_key_detected() {
        let stored = vault().encrypt("secret").unwrap();
        assert!(matches!(vault().decrypt(&stored), Err(VaultError::KeyMismatch { .. })));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let vault = vault();
        let mut stored = vault.encrypt("secret").unwrap();
        let mut bytes = hex::decode(&stored.ciphertext).unwrap();
        bytes[0] ^= 0xff;
        stored.ciphertext = hex::encode(bytes);
        assert!(matches!(vault.decrypt(&stored), Err(VaultError::DecryptionFailed(_))));
    }

    #[test]
    fn test_rotate() {
        let old = vault();
        let new = vault();
        let stored = old.encrypt("rotate-me").unwrap();
        let rotated = old.rotate(&stored, &new).unwrap();
        assert_eq!(rotated.key_id, new.key_id());
        assert_eq!(new.decrypt(&rotated).unwrap().expose_secret(), "rotate-me");
    }

    #[test]
    fn test_invalid_keys() {
        assert!(SecretVault::from_hex("abcd").is_err());
        assert!(SecretVault::from_hex("not hex at all").is_err());
        assert_eq!(SecretVault::generate_key().len(), 64);
    }
}
