use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand_core::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// AES-256-GCM cipher over provider secrets. Holds the server-side key loaded
/// once at startup; the key bytes are zeroed when the value is dropped and
/// never appear in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyCipher {
    key: [u8; KEY_SIZE],
}

impl KeyCipher {
    /// Environment variable holding the base64-encoded 256-bit key.
    pub const ENV_VAR: &'static str = "PROVIDER_KEY_SECRET";

    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_SIZE {
            return Err(CipherError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Reads `PROVIDER_KEY_SECRET`. Returns `None` when the variable is unset
    /// or unparseable; the vault endpoint reports the misconfiguration per
    /// request instead of refusing to boot.
    pub fn from_env() -> Option<Self> {
        let raw = std::env::var(Self::ENV_VAR).ok()?;
        match Self::from_base64(&raw) {
            Ok(cipher) => Some(cipher),
            Err(e) => {
                tracing::error!(%e, "PROVIDER_KEY_SECRET is set but invalid");
                None
            }
        }
    }

    #[cfg(test)]
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Encrypts `plaintext` under a fresh random nonce and returns
    /// `base64(nonce || ciphertext || tag)`. Two calls with the same input
    /// produce different blobs.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::EncryptionFailed)?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Reverses `encrypt`. Any malformed blob, truncated nonce, tag mismatch
    /// or wrong key yields `DecryptionFailed`; callers must not infer "value
    /// was plaintext" from that on their own.
    pub fn decrypt(&self, blob: &str) -> Result<String, CipherError> {
        let raw = STANDARD
            .decode(blob)
            .map_err(|_| CipherError::DecryptionFailed)?;
        if raw.len() <= NONCE_SIZE {
            return Err(CipherError::DecryptionFailed);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::DecryptionFailed)?;
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptionFailed)
    }
}

impl std::fmt::Debug for KeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
