//! Encrypted filesystem secret storage.
//!
//! Entries live under `{data_dir}/secrets/` as base64 text holding
//! `nonce || AES-256-GCM ciphertext`, with the storage key bound in as
//! associated data so an entry cannot be renamed onto another key. The
//! 32-byte data key is generated on first write at `{data_dir}/master.key`.
//! Every file is created owner-only (`0600`).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use super::{Secret, SecretStore, StoreError};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const MASTER_KEY_FILE: &str = "master.key";
const ENTRY_DIR: &str = "secrets";

/// Secret store that keeps AES-256-GCM encrypted entries on disk.
#[derive(Debug, Clone)]
pub struct EncryptedFileStore {
    base_dir: PathBuf,
}

impl EncryptedFileStore {
    /// Create a store rooted at `base_dir`. Nothing is created until the
    /// first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.base_dir
            .join(ENTRY_DIR)
            .join(format!("{}.enc", URL_SAFE_NO_PAD.encode(key)))
    }

    fn master_key_path(&self) -> PathBuf {
        self.base_dir.join(MASTER_KEY_FILE)
    }

    fn load_cipher(&self, create: bool) -> Result<Option<Aes256Gcm>, StoreError> {
        let path = self.master_key_path();
        let key = if path.exists() {
            ensure_owner_only(&path)?;
            let bytes = Zeroizing::new(fs::read(&path)?);
            if bytes.len() != KEY_SIZE {
                return Err(StoreError::Crypto {
                    message: format!(
                        "{} must hold {} bytes, found {}",
                        path.display(),
                        KEY_SIZE,
                        bytes.len()
                    ),
                });
            }
            bytes
        } else if create {
            let mut bytes = Zeroizing::new(vec![0u8; KEY_SIZE]);
            OsRng.fill_bytes(&mut bytes);
            write_owner_only(&path, &bytes)?;
            tracing::info!(path = %path.display(), "created filesystem store data key");
            bytes
        } else {
            return Ok(None);
        };

        Aes256Gcm::new_from_slice(&key)
            .map(Some)
            .map_err(|e| StoreError::Crypto {
                message: format!("invalid data key: {}", e),
            })
    }
}

#[async_trait]
impl SecretStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        ensure_owner_only(&path)?;

        let cipher = self.load_cipher(false)?.ok_or_else(|| StoreError::Crypto {
            message: format!(
                "entry exists but {} is missing",
                self.master_key_path().display()
            ),
        })?;

        let encoded = fs::read_to_string(&path)?;
        let sealed = STANDARD
            .decode(encoded.trim())
            .map_err(|e| StoreError::Crypto {
                message: format!("entry for {} is not valid base64: {}", key, e),
            })?;
        if sealed.len() < NONCE_SIZE {
            return Err(StoreError::Crypto {
                message: format!("entry for {} is truncated", key),
            });
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: key.as_bytes(),
                    },
                )
                .map_err(|_| StoreError::Crypto {
                    message: format!("entry for {} failed authentication", key),
                })?,
        );

        let value = std::str::from_utf8(&plaintext).map_err(|_| StoreError::Crypto {
            message: format!("entry for {} is not UTF-8", key),
        })?;
        Ok(Some(Secret::new(value)))
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let cipher = self
            .load_cipher(true)?
            .ok_or_else(|| StoreError::Crypto {
                message: "data key unavailable".to_string(),
            })?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: secret.expose().as_bytes(),
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Crypto {
                message: format!("failed to encrypt entry for {}", key),
            })?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        write_owner_only(&self.entry_path(key), STANDARD.encode(sealed).as_bytes())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read a PEM key file supplied directly as a credential source.
///
/// The file must not be readable by group or other users.
pub fn read_key_file(path: &Path) -> Result<Secret, StoreError> {
    ensure_owner_only(path)?;
    let contents = fs::read_to_string(path)?;
    Ok(Secret::new(contents))
}

#[cfg(unix)]
fn ensure_owner_only(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(StoreError::InsecurePermissions {
            path: path.display().to_string(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_owner_only(path: &Path) -> Result<(), StoreError> {
    fs::metadata(path)?;
    Ok(())
}

fn write_owner_only(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
