//! Repository credential encryption.
//!
//! Credentials (HTTP Basic passwords, Git tokens) are encrypted at rest with
//! AES-256-GCM. The key is derived per-call from the configured master key
//! via PBKDF2-HMAC-SHA256, so every ciphertext carries its own salt and is
//! self-contained.
//!
//! ## Wire format
//!
//! `salt(16) ‖ iv(12) ‖ ciphertext+tag`, base64-encoded (standard alphabet,
//! with padding).

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{Error, Result};

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_LEN: usize = 32;

/// Pads/truncates the configured master key to exactly 32 bytes.
fn normalize_master_key(master_key: &str) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    let bytes = master_key.as_bytes();
    let n = bytes.len().min(KEY_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn derive_key(master_key: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let base = normalize_master_key(master_key);
    let mut derived = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(&base, salt, PBKDF2_ITERATIONS, &mut derived);
    derived
}

/// Encrypts `plaintext` under `master_key`, returning a base64 string in
/// the `salt ‖ iv ‖ ciphertext+tag` wire format.
///
/// Two calls with the same plaintext and key produce different output: the
/// salt and IV are freshly randomized each call.
pub fn encrypt(plaintext: &str, master_key: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(master_key, &salt);

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| Error::EncryptionError)?;
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| Error::EncryptionError)?;

    let mut out = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(out))
}

/// Decrypts a value produced by [`encrypt`]. Fails deterministically if
/// `master_key` does not match the key used to encrypt, or if the blob is
/// truncated or tampered with.
pub fn decrypt(ciphertext_b64: &str, master_key: &str) -> Result<String> {
    let raw = STANDARD
        .decode(ciphertext_b64)
        .map_err(|_| Error::DecryptionError)?;
    if raw.len() < SALT_LEN + IV_LEN {
        return Err(Error::DecryptionError);
    }
    let (salt, rest) = raw.split_at(SALT_LEN);
    let (iv, ct) = rest.split_at(IV_LEN);

    let key = derive_key(master_key, salt);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| Error::DecryptionError)?;
    let nonce = Nonce::from_slice(iv);

    let plaintext = cipher.decrypt(nonce, ct).map_err(|_| Error::DecryptionError)?;
    String::from_utf8(plaintext).map_err(|_| Error::DecryptionError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_same_key() {
        let ct = encrypt("hunter2", "master-key").unwrap();
        let pt = decrypt(&ct, "master-key").unwrap();
        assert_eq!(pt, "hunter2");
    }

    #[test]
    fn wrong_key_fails() {
        let ct = encrypt("hunter2", "master-key").unwrap();
        assert!(decrypt(&ct, "other-key").is_err());
    }

    #[test]
    fn two_encryptions_differ() {
        let a = encrypt("same plaintext", "k").unwrap();
        let b = encrypt("same plaintext", "k").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn corrupt_blob_is_rejected() {
        assert!(decrypt("not-valid-base64!!", "k").is_err());
        assert!(decrypt(&base64::engine::general_purpose::STANDARD.encode(b"short"), "k").is_err());
    }
}
