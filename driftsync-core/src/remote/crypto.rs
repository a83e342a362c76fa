/*
    crypto.rs - Optional encryption of on-medium payloads

    AES-256-GCM with a key derived from the user's password via Argon2id.
    The derivation salt lives at Encryption/salt on the medium; a
    known-plaintext blob at Encryption/test lets a client validate a
    supplied password before any sync work begins.

    Ciphertext layout: [nonce:12][aead ciphertext].
*/

use crate::errors::{SyncError, SyncResult};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;

/// Contents of the known-plaintext test file, before encryption
const TEST_PLAINTEXT: &[u8] = b"driftsync-encryption-test";

/// Length of the random derivation salt
pub const SALT_LEN: usize = 16;

/// Encrypts and decrypts medium payloads for one document root
pub struct CryptoManager {
    cipher: Aes256Gcm,
}

// Never expose key material through Debug
impl std::fmt::Debug for CryptoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoManager").finish_non_exhaustive()
    }
}

impl CryptoManager {
    /// Derive the key from a password and the stored salt
    pub fn from_password(password: &str, salt: &[u8]) -> SyncResult<Self> {
        if salt.len() != SALT_LEN {
            return Err(SyncError::Encryption(format!("bad salt length {}", salt.len())));
        }
        let mut key_bytes = [0u8; 32];
        Argon2::default()
            .hash_password_into(password.as_bytes(), salt, &mut key_bytes)
            .map_err(|e| SyncError::Encryption(e.to_string()))?;

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(CryptoManager { cipher: Aes256Gcm::new(key) })
    }

    /// Generate a fresh random salt for first-time registration
    pub fn generate_salt() -> [u8; SALT_LEN] {
        use aes_gcm::aead::rand_core::RngCore;
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        salt
    }

    /// Encrypt a payload; output is nonce-prefixed
    pub fn encrypt(&self, plaintext: &[u8]) -> SyncResult<Vec<u8>> {
        use aes_gcm::aead::rand_core::RngCore;
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SyncError::Encryption(e.to_string()))?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a nonce-prefixed payload
    pub fn decrypt(&self, payload: &[u8]) -> SyncResult<Vec<u8>> {
        if payload.len() < 12 {
            return Err(SyncError::Encryption("payload too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SyncError::Encryption(e.to_string()))
    }

    /// Produce the known-plaintext test blob for Encryption/test
    pub fn make_test_blob(&self) -> SyncResult<Vec<u8>> {
        self.encrypt(TEST_PLAINTEXT)
    }

    /// Validate a password against the stored test blob
    ///
    /// A wrong password fails AEAD authentication and surfaces as
    /// AuthenticationRequired so the caller can re-prompt.
    pub fn verify_test_blob(&self, blob: &[u8]) -> SyncResult<()> {
        match self.decrypt(blob) {
            Ok(plain) if plain == TEST_PLAINTEXT => Ok(()),
            _ => Err(SyncError::AuthenticationRequired(
                "encryption password rejected".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let salt = CryptoManager::generate_salt();
        let crypto = CryptoManager::from_password("hunter2", &salt).unwrap();

        let ciphertext = crypto.encrypt(b"payload").unwrap();
        assert_ne!(&ciphertext[12..], b"payload");
        assert_eq!(crypto.decrypt(&ciphertext).unwrap(), b"payload");
    }

    #[test]
    fn test_nonces_are_unique() {
        let salt = CryptoManager::generate_salt();
        let crypto = CryptoManager::from_password("pw", &salt).unwrap();
        let a = crypto.encrypt(b"x").unwrap();
        let b = crypto.encrypt(b"x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let salt = CryptoManager::generate_salt();
        let right = CryptoManager::from_password("correct", &salt).unwrap();
        let wrong = CryptoManager::from_password("incorrect", &salt).unwrap();

        let blob = right.make_test_blob().unwrap();
        right.verify_test_blob(&blob).unwrap();
        let err = wrong.verify_test_blob(&blob).unwrap_err();
        assert!(matches!(err, SyncError::AuthenticationRequired(_)));
    }

    #[test]
    fn test_bad_salt_length() {
        assert!(CryptoManager::from_password("pw", &[0u8; 4]).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let salt = CryptoManager::generate_salt();
        let crypto = CryptoManager::from_password("pw", &salt).unwrap();
        let mut ciphertext = crypto.encrypt(b"data").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(crypto.decrypt(&ciphertext).is_err());
    }
}
