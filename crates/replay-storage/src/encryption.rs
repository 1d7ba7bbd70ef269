//! AES-256-GCM and ChaCha20-Poly1305 AEAD encryption of capture pieces.
//!
//! The per-session secret arrives as an opaque string. It is stretched into a
//! 256-bit key with HKDF-SHA256 and every sealed piece is laid out as
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use crate::error::StorageError;
use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the nonce prefix in a sealed piece.
pub const NONCE_LEN: usize = 12;

/// Length of the AEAD authentication tag.
pub const TAG_LEN: usize = 16;

/// Shortest session secret accepted for key derivation.
pub const MIN_SECRET_LEN: usize = 16;

const KEY_INFO: &[u8] = b"replay-storage-session-key";

/// 256-bit (32-byte) session key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

impl SessionKey {
    /// Derive a key from the session secret.
    ///
    /// Returns `Ok(None)` for an empty secret (no encryption requested) and
    /// `InvalidKey` for a secret too short to be a real key.
    pub fn from_secret(secret: &str) -> Result<Option<Self>, StorageError> {
        if secret.is_empty() {
            return Ok(None);
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(StorageError::InvalidKey {
                reason: format!(
                    "secret is {} bytes, need at least {}",
                    secret.len(),
                    MIN_SECRET_LEN
                ),
            });
        }
        let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(KEY_INFO, &mut okm)
            .map_err(|e| StorageError::InvalidKey {
                reason: e.to_string(),
            })?;
        Ok(Some(SessionKey(okm)))
    }
}

/// AEAD cipher selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncryptionAlgorithm {
    /// AES-256-GCM, hardware accelerated on x86 with AES-NI
    #[default]
    #[serde(rename = "aes-256-gcm")]
    AesGcm256,
    /// ChaCha20-Poly1305, constant-time, fast on non-AES hardware
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

fn random_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Encrypt plaintext. A random nonce is generated and prepended to the output.
pub fn encrypt(
    plaintext: &[u8],
    key: &SessionKey,
    algo: EncryptionAlgorithm,
) -> Result<Vec<u8>, StorageError> {
    let nonce = random_nonce();
    let ciphertext = match algo {
        EncryptionAlgorithm::AesGcm256 => {
            let cipher = Aes256Gcm::new_from_slice(&key.0)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?;
            cipher
                .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?
        }
        EncryptionAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::aead::Aead as _;
            use chacha20poly1305::KeyInit as _;
            let cipher = ChaCha20Poly1305::new_from_slice(&key.0)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?;
            cipher
                .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?
        }
    };
    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a sealed piece. Returns DecryptionAuthFailed if tampered/corrupted.
pub fn decrypt(
    sealed: &[u8],
    key: &SessionKey,
    algo: EncryptionAlgorithm,
) -> Result<Vec<u8>, StorageError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(StorageError::DecryptionAuthFailed);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    match algo {
        EncryptionAlgorithm::AesGcm256 => {
            let cipher = Aes256Gcm::new_from_slice(&key.0)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?;
            cipher
                .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| StorageError::DecryptionAuthFailed)
        }
        EncryptionAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::aead::Aead as _;
            use chacha20poly1305::KeyInit as _;
            let cipher = ChaCha20Poly1305::new_from_slice(&key.0)
                .map_err(|e| StorageError::EncryptionFailed(e.to_string()))?;
            cipher
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| StorageError::DecryptionAuthFailed)
        }
    }
}

/// Encrypt when a key is present, otherwise pass the bytes through.
///
/// An encryption failure is logged and the plaintext is returned instead.
/// The flag in the result is true only if the output is ciphertext.
pub fn encrypt_or_passthrough(
    data: &[u8],
    key: Option<&SessionKey>,
    algo: EncryptionAlgorithm,
) -> (Vec<u8>, bool) {
    let Some(key) = key else {
        return (data.to_vec(), false);
    };
    match encrypt(data, key, algo) {
        Ok(sealed) => (sealed, true),
        Err(e) => {
            warn!(error = %e, "can't encrypt data, storing plaintext");
            (data.to_vec(), false)
        }
    }
}
