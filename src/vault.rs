// =============================================================================
// Credential Vault — AES-256-GCM encryption for broker tokens at rest
// =============================================================================
//
// Tokens are stored as base64(nonce || ciphertext). The key comes from the
// ENCRYPTION_KEY environment variable (base64-encoded 32 bytes) and is loaded
// once at startup; a rotated key makes existing ciphertexts undecryptable and
// surfaces as a distinct error asking the user to re-enter credentials.
//
// Generate a key with:
//   head -c 32 /dev/urandom | base64
// =============================================================================

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

use crate::errors::VaultError;

/// Nonce length for AES-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// Symmetric cipher for secrets at rest.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Load the vault key from the `ENCRYPTION_KEY` environment variable.
    pub fn from_env() -> Result<Self, VaultError> {
        let raw = std::env::var("ENCRYPTION_KEY").map_err(|_| VaultError::MissingKey)?;
        if raw.trim().is_empty() {
            return Err(VaultError::MissingKey);
        }
        let key_bytes = B64.decode(raw.trim()).map_err(|_| VaultError::BadKey)?;
        let key: [u8; 32] = key_bytes.try_into().map_err(|_| VaultError::BadKey)?;
        Ok(Self::from_key_bytes(&key))
    }

    /// Build a vault from raw key bytes.
    pub fn from_key_bytes(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Encrypt a plaintext secret for database storage.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .expect("AES-GCM encryption is infallible for a valid key and nonce");

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        B64.encode(blob)
    }

    /// Decrypt a stored secret.
    ///
    /// Fails with [`VaultError::Decryption`] when the key has been rotated or
    /// the ciphertext is corrupt.
    pub fn decrypt(&self, stored: &str) -> Result<String, VaultError> {
        let blob = B64.decode(stored.trim()).map_err(|_| VaultError::Decryption)?;
        if blob.len() <= NONCE_LEN {
            return Err(VaultError::Decryption);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Decryption)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Decryption)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("key", &"<redacted>").finish()
    }
}
