//! Cryptographic primitives for the Credential Vault (C1, §4.1).
//!
//! Provides AES-256-GCM authenticated encryption and PBKDF2-SHA256 key
//! derivation, matching the Python prototype's `PBKDF2HMAC` + `Fernet`
//! pairing but expressed over `aes-gcm` directly. All key material is
//! zeroized on drop.
//!
//! # Format
//!
//! - Every encryption generates a fresh 96-bit nonce via `OsRng`.
//! - Ciphertext format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! - Key derivation: PBKDF2-HMAC-SHA256, >= 100,000 iterations.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CredentialError;

/// Minimum ciphertext length: 12-byte nonce + 16-byte AES-GCM tag.
const MIN_CIPHERTEXT_LEN: usize = 12 + 16;

/// Nonce length for AES-256-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// PBKDF2 iteration count. Matches the vault's minimum from §4.1.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// A 256-bit encryption key that is zeroized on drop. Never appears in
/// `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; 32]);

impl VaultKey {
    /// Derive a vault key from an operator-supplied passphrase and salt via
    /// PBKDF2-HMAC-SHA256.
    #[must_use]
    pub fn derive(passphrase: &[u8], salt: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        pbkdf2_hmac::<Sha256>(passphrase, salt, PBKDF2_ITERATIONS, &mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Encrypt plaintext using AES-256-GCM with a fresh random nonce.
///
/// Returns `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
///
/// # Errors
///
/// Returns [`CredentialError::Encryption`] if the AEAD operation fails.
pub fn encrypt(key: &VaultKey, plaintext: &[u8]) -> Result<Vec<u8>, CredentialError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CredentialError::Encryption { reason: e.to_string() })?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// # Errors
///
/// Returns [`CredentialError::Decryption`] if the input is too short or the
/// AEAD tag does not verify.
pub fn decrypt(key: &VaultKey, ciphertext: &[u8]) -> Result<Vec<u8>, CredentialError> {
    if ciphertext.len() < MIN_CIPHERTEXT_LEN {
        return Err(CredentialError::Decryption { reason: "ciphertext shorter than nonce+tag".to_owned() });
    }
    let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, body)
        .map_err(|e| CredentialError::Decryption { reason: e.to_string() })
}

/// Encode ciphertext for embedding in an `enc:`-prefixed env var value.
#[must_use]
pub fn encode_enc_value(ciphertext: &[u8]) -> String {
    use base64::Engine as _;
    format!("enc:{}", base64::engine::general_purpose::STANDARD.encode(ciphertext))
}

/// Decode the base64 body of an `enc:`-prefixed value.
///
/// # Errors
///
/// Returns [`CredentialError::Decryption`] if the value is not valid base64.
pub fn decode_enc_value(value: &str) -> Result<Vec<u8>, CredentialError> {
    use base64::Engine as _;
    let body = value.strip_prefix("enc:").unwrap_or(value);
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| CredentialError::Decryption { reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = VaultKey::derive(b"operator-passphrase", b"fixed-salt");
        let ciphertext = encrypt(&key, b"hunter2").expect("encrypt");
        let plaintext = decrypt(&key, &ciphertext).expect("decrypt");
        assert_eq!(plaintext, b"hunter2");
    }

    #[test]
    fn enc_prefix_roundtrips() {
        let key = VaultKey::derive(b"operator-passphrase", b"fixed-salt");
        let ciphertext = encrypt(&key, b"hunter2").expect("encrypt");
        let encoded = encode_enc_value(&ciphertext);
        assert!(encoded.starts_with("enc:"));
        let decoded = decode_enc_value(&encoded).expect("decode");
        assert_eq!(decoded, ciphertext);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let key = VaultKey::derive(b"passphrase-a", b"salt");
        let other = VaultKey::derive(b"passphrase-b", b"salt");
        let ciphertext = encrypt(&key, b"hunter2").expect("encrypt");
        assert!(decrypt(&other, &ciphertext).is_err());
    }
}
