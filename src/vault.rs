//! Machine-bound token vault.
//!
//! Seals the HuggingFace credential with AES-256-GCM under a key derived from
//! stable host identity (OS user name, hostname, application tag). Moving the
//! database to another machine leaves the stored token inert: decryption fails
//! closed with [`Error::DecryptFailed`] so the UI can prompt for re-entry.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Fixed application tag mixed into the key derivation.
const APP_TAG: &str = "photoscope-vault-v1";

/// Nonce length for AES-GCM (96 bits).
const NONCE_LEN: usize = 12;

fn machine_key() -> [u8; 32] {
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
    let mut hasher = Sha256::new();
    hasher.update(whoami::username().as_bytes());
    hasher.update(hostname.as_bytes());
    hasher.update(APP_TAG.as_bytes());
    hasher.finalize().into()
}

fn cipher_for_key(key: &[u8; 32]) -> Aes256Gcm {
    Aes256Gcm::new(key.into())
}

fn encrypt_with_key(key: &[u8; 32], plaintext: &str) -> Result<String> {
    if plaintext.is_empty() {
        return Err(Error::InvalidInput("credential must not be empty".into()));
    }
    let cipher = cipher_for_key(key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| Error::InvalidInput("encryption failed".into()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(sealed))
}

fn decrypt_with_key(key: &[u8; 32], sealed: &str) -> Result<String> {
    let raw = BASE64.decode(sealed).map_err(|_| Error::DecryptFailed)?;
    if raw.len() <= NONCE_LEN {
        return Err(Error::DecryptFailed);
    }
    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
    let cipher = cipher_for_key(key);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::DecryptFailed)?;
    String::from_utf8(plaintext).map_err(|_| Error::DecryptFailed)
}

/// Seal a credential for storage at rest on this machine.
pub fn encrypt(plaintext: &str) -> Result<String> {
    encrypt_with_key(&machine_key(), plaintext)
}

/// Unseal a stored credential. Fails closed if the ciphertext was tampered
/// with or was sealed under a different host identity.
pub fn decrypt(sealed: &str) -> Result<String> {
    decrypt_with_key(&machine_key(), sealed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let sealed = encrypt("hf_abc123").unwrap();
        assert_eq!(decrypt(&sealed).unwrap(), "hf_abc123");
    }

    #[test]
    fn test_nonce_makes_ciphertexts_differ() {
        let a = encrypt("same-token").unwrap();
        let b = encrypt("same-token").unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt(&a).unwrap(), decrypt(&b).unwrap());
    }

    #[test]
    fn test_empty_credential_rejected() {
        assert!(matches!(encrypt(""), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_flipped_byte_fails_closed() {
        let sealed = encrypt("hf_abc123").unwrap();
        let mut raw = BASE64.decode(&sealed).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let tampered = BASE64.encode(&raw);
            assert!(
                matches!(decrypt(&tampered), Err(Error::DecryptFailed)),
                "flipping byte {i} should fail decryption"
            );
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn test_garbage_input_fails_closed() {
        assert!(matches!(decrypt("not-base64!!"), Err(Error::DecryptFailed)));
        assert!(matches!(decrypt(""), Err(Error::DecryptFailed)));
        assert!(matches!(decrypt("AAAA"), Err(Error::DecryptFailed)));
    }

    #[test]
    fn test_different_host_key_fails_closed() {
        let here = machine_key();
        let sealed = encrypt_with_key(&here, "hf_abc123").unwrap();
        let mut elsewhere = here;
        elsewhere[0] ^= 0xff;
        assert!(matches!(
            decrypt_with_key(&elsewhere, &sealed),
            Err(Error::DecryptFailed)
        ));
    }
}
