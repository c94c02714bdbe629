use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::KeeperError;

/// AES-256-GCM key size. `DATA_SECRET_KEY` must be exactly this long.
pub const KEY_LEN: usize = 32;
/// AES-GCM nonce size.
const NONCE_LEN: usize = 12;

/// Symmetric envelope for record payloads. Output is
/// `base64(nonce || ciphertext)` so the same form travels over the wire and
/// sits on disk.
pub struct Cryptor {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl Cryptor {
    pub fn new(key: &[u8]) -> Result<Self, KeeperError> {
        if key.len() != KEY_LEN {
            tracing::error!(len = key.len(), "Encryption key must be {} bytes", KEY_LEN);
            return Err(KeeperError::Integrity("cipher-init-failed"));
        }

        let mut owned = Zeroizing::new([0u8; KEY_LEN]);
        owned.copy_from_slice(key);
        Ok(Self { key: owned })
    }

    fn cipher(&self) -> Result<Aes256Gcm, KeeperError> {
        Aes256Gcm::new_from_slice(&self.key[..]).map_err(|e| {
            tracing::error!(error = %e, "Cipher initialization failed");
            KeeperError::Integrity("cipher-init-failed")
        })
    }

    /// Seal `raw` with a fresh random nonce.
    pub fn encrypt(&self, raw: &[u8]) -> Result<String, KeeperError> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher.encrypt(nonce, raw).map_err(|e| {
            tracing::error!(error = %e, "Encryption failed");
            KeeperError::Integrity("encrypt-failed")
        })?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + sealed.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend(sealed);

        Ok(STANDARD.encode(envelope))
    }

    /// Open a `base64(nonce || ciphertext)` envelope.
    pub fn decrypt(&self, envelope: &str) -> Result<Vec<u8>, KeeperError> {
        let data = STANDARD.decode(envelope).map_err(|e| {
            tracing::error!(error = %e, "Envelope is not valid base64");
            KeeperError::Integrity("base64-malformed")
        })?;

        // Must hold at least the nonce and the GCM auth tag.
        if data.len() < NONCE_LEN + 16 {
            return Err(KeeperError::Integrity("auth-tag-invalid"));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = self.cipher()?;
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| KeeperError::Integrity("auth-tag-invalid"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────
