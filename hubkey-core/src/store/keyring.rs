//! OS keyring-backed secret storage implementation.

use std::time::Duration;

use async_trait::async_trait;
use keyring::Entry;

use super::{Backend, Secret, SecretStore, StoreError};

const PROBE_USER: &str = "__hubkey_probe__";

/// OS keyring-backed secret store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: kernel keyutils
/// - Windows: Credential Manager
///
/// Each entry is stored with the service name given at construction and the
/// storage key (`hubkey/{kind}/{id}`) as the keyring user. Calls into the
/// platform API are blocking, so they run on the blocking thread pool and
/// can be abandoned by a caller-side timeout.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Create a keyring store without checking availability.
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }

    /// Probe the platform keyring and return a store if it answers in time.
    ///
    /// A missing probe entry counts as available; platform failures,
    /// missing storage access and timeouts do not.
    pub async fn probe(service_name: &str, timeout: Duration) -> Result<Self, StoreError> {
        let service = service_name.to_string();
        let probe = tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, PROBE_USER)?;
            match entry.get_password() {
                Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(e),
            }
        });

        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(Ok(()))) => Ok(Self::new(service_name)),
            Ok(Ok(Err(e))) => Err(StoreError::KeyringUnavailable {
                message: e.to_string(),
            }),
            Ok(Err(join)) => Err(StoreError::BackendError {
                message: format!("keyring probe task failed: {}", join),
            }),
            Err(_) => Err(StoreError::Timeout {
                backend: Backend::Keyring,
                operation: "probe",
                after: timeout,
            }),
        }
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service_name.clone();
        let user = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &user)?;
            op(entry)
        })
        .await
        .map_err(|e| StoreError::BackendError {
            message: format!("keyring task failed: {}", e),
        })?
        .map_err(|e| map_keyring_error(key, e))
    }
}

fn map_keyring_error(key: &str, err: keyring::Error) -> StoreError {
    match err {
        keyring::Error::NoEntry => StoreError::NotFound {
            key: key.to_string(),
        },
        keyring::Error::NoStorageAccess(e) => StoreError::KeyringUnavailable {
            message: format!("no access to keyring storage: {}", e),
        },
        keyring::Error::PlatformFailure(e) => StoreError::KeyringUnavailable {
            message: format!("platform keyring failure: {}", e),
        },
        keyring::Error::Ambiguous(_) => StoreError::BackendError {
            message: format!("ambiguous keyring entry for key: {}", key),
        },
        keyring::Error::Invalid(attr, reason) => StoreError::BackendError {
            message: format!("invalid keyring attribute {}: {}", attr, reason),
        },
        e => StoreError::BackendError {
            message: format!("keyring error: {}", e),
        },
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        match self.with_entry(key, |entry| entry.get_password()).await {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let value = secret.clone();
        self.with_entry(key, move |entry| entry.set_password(value.expose()))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.with_entry(key, |entry| entry.delete_credential()).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
