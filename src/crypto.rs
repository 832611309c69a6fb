//! Session encryption keyed by wallet address
//!
//! Payloads are sealed with AES-256-GCM under a key derived by
//! PBKDF2-HMAC-SHA256 from the lower-cased owner address (optionally joined
//! with a passphrase). The output is `base64(iv || ciphertext || tag)` with a
//! fresh 96-bit IV per call, so equal plaintexts never produce equal blobs.
//!
//! # Limitation
//!
//! A wallet address is public. Without a passphrase this keeps the archived
//! history unreadable to the storage provider and to casual browsing of the
//! public archive, not to someone who knows which address to try. Setting
//! `crypto.passphrase` adds a secret factor through the same KDF.

use crate::config::CryptoConfig;
use crate::error::{ChatSyncError, Result};
use crate::storage::ChatSession;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Mutex;

/// Length of the AES-GCM initialization vector in bytes
pub const IV_LEN: usize = 12;
/// Length of the AES-GCM authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Derive a 256-bit key with PBKDF2-HMAC-SHA256
///
/// # Examples
///
/// ```
/// use chatsync::crypto::derive_key;
///
/// let a = derive_key("0xabc", b"salt", 1_000);
/// let b = derive_key("0xabc", b"salt", 1_000);
/// assert_eq!(a, b);
/// ```
pub fn derive_key(material: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(material.as_bytes(), salt, iterations, &mut key);
    key
}

/// Encrypts and decrypts session payloads
///
/// Derived keys are cached per key material for the life of the cipher,
/// since each derivation runs the full iteration count.
pub struct SessionCipher {
    config: CryptoConfig,
    keys: Mutex<HashMap<String, [u8; 32]>>,
}

impl SessionCipher {
    /// Create a cipher from its configuration
    pub fn new(config: CryptoConfig) -> Self {
        Self {
            config,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Encrypt `plaintext` for `address`
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Encryption` if the address is empty or the
    /// cipher rejects the input
    pub fn encrypt(&self, plaintext: &str, address: &str) -> Result<String> {
        let material = self
            .key_material(address)
            .ok_or_else(|| ChatSyncError::Encryption("no owner address for key".to_string()))?;
        let key = self.key_for(&material);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| ChatSyncError::Encryption(format!("AES-GCM seal failed: {}", e)))?;

        let mut packed = Vec::with_capacity(IV_LEN + sealed.len());
        packed.extend_from_slice(&iv);
        packed.extend_from_slice(&sealed);
        Ok(STANDARD.encode(packed))
    }

    /// Decrypt a blob produced by [`SessionCipher::encrypt`]
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Decryption` if the blob is not base64, is
    /// truncated, fails authentication (wrong address, tampering) or does
    /// not hold UTF-8 text
    pub fn decrypt(&self, blob: &str, address: &str) -> Result<String> {
        let material = self
            .key_material(address)
            .ok_or_else(|| ChatSyncError::Decryption("no owner address for key".to_string()))?;

        let packed = STANDARD
            .decode(blob.trim())
            .map_err(|e| ChatSyncError::Decryption(format!("invalid base64: {}", e)))?;
        if packed.len() < IV_LEN + TAG_LEN {
            return Err(ChatSyncError::Decryption(format!(
                "blob too short: {} bytes",
                packed.len()
            ))
            .into());
        }

        let (iv, sealed) = packed.split_at(IV_LEN);
        let key = self.key_for(&material);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let plain = cipher.decrypt(Nonce::from_slice(iv), sealed).map_err(|_| {
            ChatSyncError::Decryption("authentication failed: wrong key or corrupted data".into())
        })?;

        String::from_utf8(plain)
            .map_err(|e| ChatSyncError::Decryption(format!("plaintext is not UTF-8: {}", e)).into())
    }

    /// Serialize and encrypt a session
    pub fn encrypt_session(&self, session: &ChatSession, address: &str) -> Result<String> {
        let json = serde_json::to_string(session)?;
        self.encrypt(&json, address)
    }

    /// Decrypt and parse a session
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Decryption` on any decryption failure and
    /// also when the plaintext is not a session document
    pub fn decrypt_session(&self, blob: &str, address: &str) -> Result<ChatSession> {
        let json = self.decrypt(blob, address)?;
        serde_json::from_str(&json).map_err(|e| {
            ChatSyncError::Decryption(format!("decrypted payload is not a chat session: {}", e))
                .into()
        })
    }

    fn key_material(&self, address: &str) -> Option<String> {
        let address = address.trim().to_lowercase();
        if address.is_empty() {
            return None;
        }
        match self.config.passphrase.as_deref().filter(|p| !p.is_empty()) {
            Some(passphrase) => Some(format!("{}:{}", address, passphrase)),
            None => Some(address),
        }
    }

    fn key_for(&self, material: &str) -> [u8; 32] {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        *keys.entry(material.to_string()).or_insert_with(|| {
            derive_key(
                material,
                self.config.salt.as_bytes(),
                self.config.iterations,
            )
        })
    }
}
