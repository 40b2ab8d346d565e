//! API-key encryption at rest.
//!
//! A 32-byte key is generated once at startup (or loaded from the key file)
//! and wraps provider API keys with AES-256-GCM before they touch disk.
//! The store is constructed explicitly and passed by reference to whatever
//! needs it; there is no global state and no lazy creation.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use paperdeck_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// AEAD wrapper around the on-disk master key.
pub struct ApiKeyStore {
    cipher: Aes256Gcm,
    path: PathBuf,
}

impl std::fmt::Debug for ApiKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug output.
        f.debug_struct("ApiKeyStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ApiKeyStore {
    /// Load the master key from `path`, generating it on first run.
    ///
    /// Call once at startup and share the store by reference.
    pub fn init(path: &Path) -> Result<Self> {
        let key_bytes = if path.exists() {
            let hex_key = fs::read_to_string(path).map_err(|e| Error::Storage(e.to_string()))?;
            let bytes =
                hex::decode(hex_key.trim()).map_err(|e| Error::Storage(e.to_string()))?;
            if bytes.len() != KEY_LEN {
                return Err(Error::Storage(format!(
                    "key file {} holds {} bytes, expected {KEY_LEN}",
                    path.display(),
                    bytes.len()
                )));
            }
            bytes
        } else {
            let key = Aes256Gcm::generate_key(OsRng);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
            }
            fs::write(path, hex::encode(key)).map_err(|e| Error::Storage(e.to_string()))?;
            key.to_vec()
        };

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|_| Error::Storage("invalid master key length".to_string()))?;
        Ok(Self {
            cipher,
            path: path.to_path_buf(),
        })
    }

    /// Encrypt an API key for storage: base64 of `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::Storage("api key encryption failed".to_string()))?;
        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    /// Decrypt a stored API key.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let payload = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::Storage(format!("bad key payload: {e}")))?;
        if payload.len() <= NONCE_LEN {
            return Err(Error::Storage("key payload too short".to_string()));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Storage("api key decryption failed".to_string()))?;
        String::from_utf8(plaintext).map_err(|e| Error::Storage(e.to_string()))
    }
}
