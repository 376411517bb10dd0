//! Top-level error type for hubkey.

use thiserror::Error;

use crate::config::ConfigError;
use crate::jwt::JwtError;
use crate::matcher::PatternError;
use crate::protocol::ProtocolError;
use crate::store::StoreError;
use crate::token::TokenError;

/// Top-level error type encompassing all hubkey errors.
///
/// No variant carries secret material; every message is safe to print.
#[derive(Debug, Error)]
pub enum HubkeyError {
    /// Error from secret storage operations.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A source pattern could not be compiled.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// The App assertion could not be minted.
    #[error(transparent)]
    Assertion(#[from] JwtError),

    /// Token exchange or installation discovery failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The credential request could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A matched source's secret is not in any backend.
    #[error("no secret stored for {kind} source '{name}'; run `git-credential-hubkey {import_command} {name}`")]
    SecretNotFound {
        name: String,
        kind: &'static str,
        import_command: &'static str,
    },
}
