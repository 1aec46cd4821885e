//! AES-256-GCM protection for the passwords kept in the config file.
//!
//! The key lives hex-encoded in its own file and is created on first use.
//! Ciphertexts are `hex(nonce || ciphertext || tag)`.

use std::{
    fs::{self, OpenOptions},
    io::{self, ErrorKind, Write},
    path::Path,
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("key must be 32 hex encoded bytes")]
    InvalidKey,
    #[error("ciphertext is not valid hex")]
    InvalidEncoding,
    #[error("ciphertext is too short")]
    Truncated,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed, wrong key or corrupted ciphertext")]
    Decrypt,
    #[error("decrypted secret is not valid UTF-8")]
    NotUtf8,
}

#[derive(Clone)]
pub struct SecretKey {
    key: Key<Aes256Gcm>,
}

impl SecretKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            key: Key::<Aes256Gcm>::clone_from_slice(&bytes),
        }
    }

    pub fn from_hex(raw: &str) -> Result<Self, SecretError> {
        let bytes = hex::decode(raw.trim()).map_err(|_| SecretError::InvalidKey)?;
        if bytes.len() != KEY_LEN {
            return Err(SecretError::InvalidKey);
        }
        Ok(Self {
            key: Key::<Aes256Gcm>::clone_from_slice(&bytes),
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key.as_slice())
    }

    /// Reads the key file, writing a fresh key (mode 0600) when it does not exist.
    /// The flag tells whether a new key was created.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool), SecretError> {
        let key_file_error = |source| SecretError::KeyFile {
            path: path.display().to_string(),
            source,
        };

        match fs::read_to_string(path) {
            Ok(raw) => Ok((Self::from_hex(&raw)?, false)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(key_file_error)?;
                }
                let key = Self::generate();
                let mut options = OpenOptions::new();
                options.write(true).create_new(true);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::OpenOptionsExt;
                    options.mode(0o600);
                }
                let mut file = options.open(path).map_err(key_file_error)?;
                file.write_all(key.to_hex().as_bytes())
                    .map_err(key_file_error)?;
                Ok((key, true))
            }
            Err(err) => Err(key_file_error(err)),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| SecretError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String, SecretError> {
        let sealed = hex::decode(encrypted.trim()).map_err(|_| SecretError::InvalidEncoding)?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(SecretError::Truncated);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = Aes256Gcm::new(&self.key)
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| SecretError::NotUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_password_opens_with_the_same_key_only() {
        let key = SecretKey::generate();
        let sealed = key.encrypt("correct horse").unwrap();
        assert_ne!(sealed, "correct horse");
        assert_eq!(key.decrypt(&sealed).unwrap(), "correct horse");

        let other = SecretKey::generate();
        assert!(matches!(other.decrypt(&sealed), Err(SecretError::Decrypt)));
        assert!(matches!(key.decrypt("zz"), Err(SecretError::InvalidEncoding)));
        assert!(matches!(key.decrypt("abcd"), Err(SecretError::Truncated)));
    }

    #[test]
    fn key_file_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("eatspam.key");

        let (first, created) = SecretKey::load_or_create(&path).unwrap();
        assert!(created);
        let (second, created) = SecretKey::load_or_create(&path).unwrap();
        assert!(!created);
        assert_eq!(first.to_hex(), second.to_hex());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn malformed_key_is_rejected() {
        assert!(matches!(SecretKey::from_hex("abc"), Err(SecretError::InvalidKey)));
        assert!(matches!(SecretKey::from_hex("00ff"), Err(SecretError::InvalidKey)));
    }
}
