//! Authenticated encryption for OAuth tokens at rest.
//!
//! AES-256-GCM with a 16-byte random IV. The stored form is
//! `hex(iv) || hex(tag) || hex(ciphertext)`: 32 hex chars of IV, 32 hex chars
//! of tag, then the ciphertext.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use thiserror::Error;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

const IV_HEX_LEN: usize = 32;
const TAG_HEX_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("encryption key must be 64 hex characters")]
    InvalidKey,

    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),

    #[error("authentication tag mismatch")]
    TagMismatch,
}

/// Encrypts and decrypts secrets with a single process-wide key.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm16,
}

impl TokenCipher {
    /// Build from the 64-hex-char key in configuration.
    pub fn from_hex(key_hex: &str) -> Result<Self, IntegrityError> {
        let key_hex = key_hex.trim();
        if key_hex.len() != 64 {
            return Err(IntegrityError::InvalidKey);
        }
        let key = hex::decode(key_hex).map_err(|_| IntegrityError::InvalidKey)?;
        let cipher = Aes256Gcm16::new_from_slice(&key).map_err(|_| IntegrityError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, IntegrityError> {
        let iv = Aes256Gcm16::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(&iv, b"", &mut buffer)
            .map_err(|_| IntegrityError::Malformed("encryption failed"))?;

        let mut out = String::with_capacity(IV_HEX_LEN + TAG_HEX_LEN + buffer.len() * 2);
        out.push_str(&hex::encode(iv));
        out.push_str(&hex::encode(tag));
        out.push_str(&hex::encode(&buffer));
        Ok(out)
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, IntegrityError> {
        if !stored.is_ascii() {
            return Err(IntegrityError::Malformed("non-hex input"));
        }
        if stored.len() < IV_HEX_LEN + TAG_HEX_LEN {
            return Err(IntegrityError::Malformed("input too short"));
        }

        let (iv_hex, rest) = stored.split_at(IV_HEX_LEN);
        let (tag_hex, ct_hex) = rest.split_at(TAG_HEX_LEN);

        let iv = hex::decode(iv_hex).map_err(|_| IntegrityError::Malformed("bad iv"))?;
        let tag = hex::decode(tag_hex).map_err(|_| IntegrityError::Malformed("bad tag"))?;
        let mut buffer = hex::decode(ct_hex).map_err(|_| IntegrityError::Malformed("bad ciphertext"))?;

        self.cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&iv),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| IntegrityError::TagMismatch)?;

        String::from_utf8(buffer).map_err(|_| IntegrityError::Malformed("plaintext is not utf-8"))
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const OTHER_KEY: &str = "ff0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn cipher() -> TokenCipher {
        TokenCipher::from_hex(KEY).unwrap()
    }

    #[test]
    fn decrypts_what_it_encrypts() {
        let c = cipher();
        let stored = c.encrypt("act.example-access-token").unwrap();
        assert_eq!(c.decrypt(&stored).unwrap(), "act.example-access-token");
    }

    #[test]
    fn stored_form_is_iv_tag_ciphertext_hex() {
        let stored = cipher().encrypt("abc").unwrap();
        assert_eq!(stored.len(), 32 + 32 + 6);
        assert!(stored.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let c = cipher();
        assert_ne!(c.encrypt("same").unwrap(), c.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let stored = cipher().encrypt("secret").unwrap();
        let other = TokenCipher::from_hex(OTHER_KEY).unwrap();
        assert_eq!(other.decrypt(&stored), Err(IntegrityError::TagMismatch));
    }

    #[test]
    fn flipped_ciphertext_byte_is_rejected() {
        let c = cipher();
        let mut stored = c.encrypt("secret").unwrap();
        let last = stored.pop().unwrap();
        stored.push(if last == '0' { '1' } else { '0' });
        assert_eq!(c.decrypt(&stored), Err(IntegrityError::TagMismatch));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let c = cipher();
        assert!(matches!(c.decrypt("abcd"), Err(IntegrityError::Malformed(_))));
        let not_hex = "zz".repeat(40);
        assert!(matches!(c.decrypt(&not_hex), Err(IntegrityError::Malformed(_))));
    }

    #[test]
    fn key_must_be_64_hex_chars() {
        assert_eq!(TokenCipher::from_hex("abcd").unwrap_err(), IntegrityError::InvalidKey);
        assert_eq!(
            TokenCipher::from_hex(&"g".repeat(64)).unwrap_err(),
            IntegrityError::InvalidKey
        );
    }
}
