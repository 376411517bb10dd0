//! Secret storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for a single secure storage backend
//! - [`MemoryStore`] - In-memory backend for testing
//! - [`KeyringStore`] - OS keyring backend (with `keyring-store` feature)
//! - [`EncryptedFileStore`] - AES-256-GCM encrypted entries on disk
//! - [`SecretsStore`] - Keyring-first store with a bounded-time filesystem fallback
//!
//! # Storage Key Convention
//!
//! Keys follow the pattern: `hubkey/{kind}/{id}`, for example
//! `hubkey/private_key/ci-bot` or `hubkey/token/personal`.
//!
//! # Example
//!
//! ```rust,ignore
//! use hubkey_core::store::{Secret, SecretKind, SecretOrigin, SecretsStore};
//!
//! let store = SecretsStore::detect("hubkey", data_dir, Duration::from_secs(3)).await;
//! let pem = Secret::new(std::fs::read_to_string("key.pem")?);
//! let backend = store
//!     .put("ci-bot", SecretKind::PrivateKey, &pem, &SecretOrigin::File("key.pem".into()))
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::{EncryptedFileStore, read_key_file};
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is zeroed when the secret is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Length of the secret in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Secret)
    }
}

/// Category of a stored secret. Part of the storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    /// PEM-encoded GitHub App private key.
    PrivateKey,

    /// Static access token (personal access token or similar).
    Token,
}

impl SecretKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrivateKey => "private_key",
            Self::Token => "token",
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend that holds (or should hold) a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Platform keyring (Keychain, Credential Manager, kernel keyring).
    Keyring,

    /// Encrypted entry under the data directory.
    Filesystem,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyring => f.write_str("keyring"),
            Self::Filesystem => f.write_str("filesystem"),
        }
    }
}

/// Where a secret handed to [`SecretsStore::put`] came from.
///
/// The filesystem fallback is only allowed for secrets that have a
/// persistent location the user can point at again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretOrigin {
    /// Read from a file on disk.
    File(PathBuf),

    /// Supplied through an ephemeral channel (environment variable, stdin).
    Transient { description: String },
}

impl fmt::Display for SecretOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Transient { description } => f.write_str(description),
        }
    }
}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested secret was not found.
    #[error("secret not found: {key}")]
    NotFound { key: String },

    /// A key file is readable by group or other users.
    #[error("{path} has insecure permissions {mode:o}; run `chmod 600 {path}`")]
    InsecurePermissions { path: String, mode: u32 },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },

    /// A backend call did not finish before its deadline.
    #[error("{operation} on {backend} timed out after {after:?}")]
    Timeout {
        backend: Backend,
        operation: &'static str,
        after: Duration,
    },

    /// No usable backend remains for the requested write.
    #[error("secure storage unavailable: {remediation}")]
    StorageUnavailable { remediation: String },

    /// Encryption or decryption of a filesystem entry failed.
    #[error("encrypted store error: {message}")]
    Crypto { message: String },

    /// I/O error on the filesystem backend.
    #[error("filesystem store I/O error")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this error means the keyring cannot be used right now, as
    /// opposed to the entry simply being absent or malformed.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::KeyringUnavailable { .. } | Self::Timeout { .. }
        )
    }
}

/// Abstraction over a single secret storage backend.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
/// - [`EncryptedFileStore`] - Encrypted files under the data directory
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Build the storage key for a secret.
pub fn storage_key(kind: SecretKind, id: &str) -> String {
    format!("hubkey/{}/{}", kind.as_str(), id)
}

/// Keyring-first secret store with an encrypted filesystem fallback.
///
/// Every keyring call runs under `timeout`, so a headless machine without a
/// keyring daemon degrades to the filesystem instead of hanging git.
pub struct SecretsStore {
    keyring: Option<Arc<dyn SecretStore>>,
    files: EncryptedFileStore,
    timeout: Duration,
}

impl SecretsStore {
    /// Create a store from explicit backends.
    ///
    /// Pass `None` for `keyring` when no keyring backend is usable.
    pub fn new(
        keyring: Option<Arc<dyn SecretStore>>,
        files: EncryptedFileStore,
        timeout: Duration,
    ) -> Self {
        Self {
            keyring,
            files,
            timeout,
        }
    }

    /// Create a store, probing the OS keyring for availability.
    ///
    /// Falls back to filesystem-only storage if the probe fails or times out.
    pub async fn detect(service: &str, data_dir: PathBuf, timeout: Duration) -> Self {
        let files = EncryptedFileStore::new(data_dir);

        #[cfg(feature = "keyring-store")]
        match KeyringStore::probe(service, timeout).await {
            Ok(store) => {
                tracing::debug!(service, "using OS keyring for secret storage");
                return Self::new(Some(Arc::new(store)), files, timeout);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "keyring unavailable, secrets will use the encrypted filesystem store"
                );
            }
        }

        #[cfg(not(feature = "keyring-store"))]
        tracing::debug!(service, "keyring-store feature disabled");

        Self::new(None, files, timeout)
    }

    /// Whether a keyring backend was selected.
    pub fn has_keyring(&self) -> bool {
        self.keyring.is_some()
    }

    /// Store a secret, preferring the keyring.
    ///
    /// Falls back to the filesystem only when the keyring is unavailable or
    /// times out *and* the secret came from a persistent file.
    ///
    /// File-backed secrets are also written to the filesystem after a
    /// successful keyring write. Some keyrings (the Linux kernel keyring)
    /// lose their entries on reboot, and [`get`](Self::get) then reads the
    /// encrypted copy instead.
    pub async fn put(
        &self,
        id: &str,
        kind: SecretKind,
        secret: &Secret,
        origin: &SecretOrigin,
    ) -> Result<Backend, StoreError> {
        let key = storage_key(kind, id);

        let keyring_failure = match &self.keyring {
            Some(keyring) => match self.bounded("set", keyring.set(&key, secret)).await {
                Ok(()) => {
                    tracing::debug!(id, %kind, backend = %Backend::Keyring, "stored secret");
                    match origin {
                        SecretOrigin::File(path) => {
                            self.files.set(&key, secret).await?;
                            tracing::debug!(
                                id,
                                %kind,
                                source_file = %path.display(),
                                "wrote encrypted filesystem copy"
                            );
                        }
                        SecretOrigin::Transient { .. } if cfg!(target_os = "linux") => {
                            tracing::warn!(
                                id,
                                %kind,
                                "the kernel keyring does not survive a reboot; \
                                 import from an owner-only file with --file to keep this secret"
                            );
                        }
                        SecretOrigin::Transient { .. } => {}
                    }
                    return Ok(Backend::Keyring);
                }
                Err(e) if e.is_unavailable() => e.to_string(),
                Err(e) => return Err(e),
            },
            None => "no keyring backend detected".to_string(),
        };

        match origin {
            SecretOrigin::File(path) => {
                tracing::warn!(
                    id,
                    %kind,
                    reason = %keyring_failure,
                    source_file = %path.display(),
                    "keyring unavailable, writing encrypted filesystem entry"
                );
                self.files.set(&key, secret).await?;
                Ok(Backend::Filesystem)
            }
            SecretOrigin::Transient { .. } => Err(StoreError::StorageUnavailable {
                remediation: remediation(origin, kind, &keyring_failure),
            }),
        }
    }

    /// Retrieve a secret, trying the keyring first and then the filesystem.
    pub async fn get(&self, id: &str, kind: SecretKind) -> Result<(Secret, Backend), StoreError> {
        let key = storage_key(kind, id);

        if let Some(keyring) = &self.keyring {
            match self.bounded("get", keyring.get(&key)).await {
                Ok(Some(secret)) => return Ok((secret, Backend::Keyring)),
                Ok(None) => tracing::debug!(id, %kind, "not in keyring, checking filesystem"),
                Err(e) if e.is_unavailable() => {
                    tracing::warn!(id, %kind, error = %e, "keyring read failed, checking filesystem")
                }
                Err(e) => return Err(e),
            }
        }

        match self.files.get(&key).await? {
            Some(secret) => Ok((secret, Backend::Filesystem)),
            None => Err(StoreError::NotFound { key }),
        }
    }

    /// Retrieve a secret, honouring the backend a reference was recorded with.
    ///
    /// Filesystem references skip the keyring entirely.
    pub async fn get_from(
        &self,
        backend: Backend,
        id: &str,
        kind: SecretKind,
    ) -> Result<Secret, StoreError> {
        match backend {
            Backend::Keyring => self.get(id, kind).await.map(|(secret, _)| secret),
            Backend::Filesystem => {
                let key = storage_key(kind, id);
                self.files
                    .get(&key)
                    .await?
                    .ok_or(StoreError::NotFound { key })
            }
        }
    }

    /// Delete a secret from every backend that may hold it.
    pub async fn delete(&self, id: &str, kind: SecretKind) -> Result<(), StoreError> {
        let key = storage_key(kind, id);

        if let Some(keyring) = &self.keyring {
            match self.bounded("delete", keyring.delete(&key)).await {
                Ok(()) => {}
                Err(e) if e.is_unavailable() => {
                    tracing::warn!(id, %kind, error = %e, "could not delete keyring entry")
                }
                Err(e) => return Err(e),
            }
        }

        self.files.delete(&key).await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout {
                backend: Backend::Keyring,
                operation,
                after: self.timeout,
            })?
    }
}

impl fmt::Debug for SecretsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsStore")
            .field("keyring", &self.keyring.is_some())
            .field("files", &self.files)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn remediation(origin: &SecretOrigin, kind: SecretKind, reason: &str) -> String {
    let alternative = match kind {
        SecretKind::PrivateKey => "pass the private key with --file <path.pem> instead",
        SecretKind::Token => "write the token to an owner-only file and pass it with --file <path>",
    };
    format!(
        "the OS keyring could not be used ({reason}) and {origin} has no persistent location \
         for the encrypted filesystem fallback; {alternative}, or {}",
        keyring_guidance()
    )
}

fn keyring_guidance() -> &'static str {
    if cfg!(target_os = "macos") {
        "unlock the login keychain with `security unlock-keychain`"
    } else if cfg!(target_os = "windows") {
        "make sure the Windows Credential Manager service is running"
    } else {
        "install and start a Secret Service provider such as gnome-keyring \
         (`apt install gnome-keyring`) or make the kernel keyring available to this session"
    }
}
