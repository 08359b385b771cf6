//! Encryption of secrets at rest.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::AuthError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// AES-256-GCM key for passwords and session tokens at rest.
///
/// Written out as unpadded URL-safe base64.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Generate a random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(key.as_slice());
        Self(bytes)
    }

    /// Parse a key from its base64 form. Trailing padding is accepted.
    pub fn parse(encoded: &str) -> Result<Self, AuthError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim().trim_end_matches('='))
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            AuthError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self(bytes))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&self.0))
    }

    /// Encrypt to `nonce || ciphertext`, base64 encoded.
    pub fn seal(&self, plaintext: &str) -> Result<String, AuthError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AuthError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Reverse [`EncryptionKey::seal`]. Fails on a different key or
    /// tampered data.
    pub fn open(&self, sealed: &str) -> Result<String, AuthError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|_| AuthError::Decryption)?;
        if bytes.len() < NONCE_LEN {
            return Err(AuthError::Decryption);
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AuthError::Decryption)?;
        String::from_utf8(plaintext).map_err(|_| AuthError::Decryption)
    }
}

impl fmt::Display for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_seal_then_open() {
        let key = EncryptionKey::generate();
        let sealed = key.seal("hunter2").unwrap();

        assert!(!sealed.contains("hunter2"));
        assert_eq!(key.open(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn test_same_plaintext_seals_differently() {
        let key = EncryptionKey::generate();
        assert_ne!(key.seal("hunter2").unwrap(), key.seal("hunter2").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = EncryptionKey::generate().seal("hunter2").unwrap();
        let result = EncryptionKey::generate().open(&sealed);
        assert!(matches!(result, Err(AuthError::Decryption)));
    }

    #[test]
    fn test_tampered_data_fails() {
        let key = EncryptionKey::generate();
        let mut bytes = URL_SAFE_NO_PAD.decode(key.seal("hunter2").unwrap()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;

        let result = key.open(&URL_SAFE_NO_PAD.encode(bytes));
        assert!(matches!(result, Err(AuthError::Decryption)));
        assert!(matches!(key.open("short"), Err(AuthError::Decryption)));
    }

    #[test]
    fn test_display_parses_back() {
        let key = EncryptionKey::generate();
        assert_eq!(EncryptionKey::parse(&key.to_string()).unwrap(), key);
    }

    #[test]
    fn test_parse_accepts_padded_form() {
        let key = EncryptionKey::generate();
        let padded = base64::engine::general_purpose::URL_SAFE.encode(key.0);
        assert!(padded.ends_with('='));
        assert_eq!(EncryptionKey::parse(&padded).unwrap(), key);
    }

    #[test]
    fn test_parse_rejects_bad_keys() {
        assert!(matches!(
            EncryptionKey::parse("not base64!"),
            Err(AuthError::InvalidKey(_))
        ));
        let short = URL_SAFE_NO_PAD.encode([7u8; 16]);
        assert!(matches!(
            EncryptionKey::parse(&short),
            Err(AuthError::InvalidKey(msg)) if msg.contains("16")
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let key = EncryptionKey::generate();
        assert!(!format!("{:?}", key).contains(&key.to_string()));
    }
}
