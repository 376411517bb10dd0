//! # hubkey Core
//!
//! Credential resolution engine behind the `git-credential-hubkey` helper.
//!
//! This crate provides:
//! - Pattern-based routing of git requests to configured credential sources
//! - A keyring-first secrets store with an encrypted filesystem fallback
//! - GitHub App JWT minting and an installation token cache with
//!   single-flight refresh
//! - The git credential protocol handler tying these together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hubkey_core::{Config, CredentialHelper, Operation, SecretsStore};
//!
//! async fn answer(config: &Config, store: Arc<SecretsStore>) -> Result<(), hubkey_core::HubkeyError> {
//!     let helper = CredentialHelper::from_config(config, store)?;
//!     let stdin = std::io::stdin().lock();
//!     helper.handle(Operation::Get, stdin, std::io::stdout()).await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod git_config;
pub mod github;
pub mod helper;
pub mod jwt;
pub mod matcher;
pub mod model;
pub mod protocol;
pub mod redact;
pub mod store;
pub mod token;
pub mod token_cache;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, SystemClock};

pub use config::{Config, ConfigError, Settings};

pub use error::HubkeyError;

pub use github::GitHubApi;

pub use helper::{CredentialHelper, Outcome};

pub use jwt::{JwtError, JwtMinter};

pub use matcher::{LookupKey, Pattern, PatternError, SourceMatcher};

pub use model::{AppSource, CredentialSource, SecretRef, TokenSource, DEFAULT_USERNAME};

pub use protocol::{CredentialRequest, CredentialResponse, Operation, ProtocolError};

pub use store::{
    Backend,
    EncryptedFileStore,
    MemoryStore,
    Secret,
    SecretKind,
    SecretOrigin,
    SecretStore,
    SecretsStore,
    StoreError,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use token::{InstallationToken, TokenError};

pub use token_cache::InstallationTokenCache;
