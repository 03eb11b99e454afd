//! Sealing of stored bot credentials with AES-256-GCM.
//!
//! Format: base64(nonce_12bytes || ciphertext || tag_16bytes)

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use rand::RngCore;
use teletrade_db::models::bot::{CredentialScheme, StoredCredential};
use thiserror::Error;
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential key must be base64 of 32 bytes")]
    InvalidKey,
    #[error("credential is sealed but no credential key is configured")]
    KeyMissing,
    #[error("sealed credential is malformed")]
    Malformed,
    #[error("credential could not be opened (wrong key or tampered data)")]
    Decryption,
    #[error("credential could not be sealed")]
    Encryption,
}

/// Opens every stored credential, whatever scheme it was written with.
#[derive(Clone)]
pub struct CredentialCipher {
    key: Option<[u8; KEY_LEN]>,
}

impl Drop for CredentialCipher {
    fn drop(&mut self) {
        if let Some(key) = self.key.as_mut() {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("key", &self.key.map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialCipher {
    pub fn from_base64(encoded: Option<&str>) -> Result<Self, CredentialError> {
        let Some(encoded) = encoded else {
            return Ok(Self { key: None });
        };
        let mut bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| CredentialError::InvalidKey)?;
        if bytes.len() != KEY_LEN {
            bytes.zeroize();
            return Err(CredentialError::InvalidKey);
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { key: Some(key) })
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// The single accessor for stored credentials.
    pub fn open(&self, credential: &StoredCredential<'_>) -> Result<String, CredentialError> {
        match credential.scheme {
            CredentialScheme::PlaintextV0 => Ok(credential.value.to_string()),
            CredentialScheme::Aes256GcmV1 => self.decrypt(credential.value),
        }
    }

    /// Seals a plaintext credential under the configured key.
    pub fn seal(&self, plaintext: &str) -> Result<String, CredentialError> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CredentialError::Encryption)?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&result))
    }

    fn decrypt(&self, sealed: &str) -> Result<String, CredentialError> {
        let cipher = self.cipher()?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(sealed.trim())
            .map_err(|_| CredentialError::Malformed)?;
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CredentialError::Malformed);
        }

        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
        let plaintext = cipher
            .decrypt(nonce, &data[NONCE_LEN..])
            .map_err(|_| CredentialError::Decryption)?;
        String::from_utf8(plaintext).map_err(|_| CredentialError::Malformed)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CredentialError> {
        let key = self.key.as_ref().ok_or(CredentialError::KeyMissing)?;
        Aes256Gcm::new_from_slice(key).map_err(|_| CredentialError::InvalidKey)
    }
}
