//! Domain model types for hubkey.
//!
//! This module defines the core types used throughout hubkey:
//! - [`CredentialSource`] - A configured identity that can answer requests
//! - [`AppSource`] - A GitHub App installation
//! - [`TokenSource`] - A static access token
//! - [`SecretRef`] - Locator for a secret held by the secrets store

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::store::{Backend, SecretKind};

/// Opaque locator for a stored secret.
///
/// Never embeds the secret value; it is resolved only at the moment of use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    /// Backend the secret was stored in.
    pub backend: Backend,

    /// Identifier within the backend, usually the source name.
    pub id: String,
}

impl SecretRef {
    pub fn keyring(id: impl Into<String>) -> Self {
        Self {
            backend: Backend::Keyring,
            id: id.into(),
        }
    }

    pub fn filesystem(id: impl Into<String>) -> Self {
        Self {
            backend: Backend::Filesystem,
            id: id.into(),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.id)
    }
}

/// A GitHub App installation used to mint installation tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSource {
    pub name: String,

    /// Numeric GitHub App ID (the JWT issuer).
    pub app_id: i64,

    /// Installation to request tokens for. `0` means "discover from the
    /// request's owner segment".
    #[serde(default)]
    pub installation_id: u64,

    pub patterns: Vec<String>,

    #[serde(default)]
    pub priority: i32,

    /// Where the PEM private key is stored.
    pub key: SecretRef,

    /// Owner-only PEM file to read instead of `key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
}

/// A static token such as a personal access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSource {
    pub name: String,

    /// Username to report; defaults to the request's username, then
    /// [`DEFAULT_USERNAME`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    pub patterns: Vec<String>,

    #[serde(default)]
    pub priority: i32,

    /// Where the token value is stored.
    pub token: SecretRef,
}

/// Username git must send alongside an installation token.
pub const DEFAULT_USERNAME: &str = "x-access-token";

/// A configured identity that can answer credential requests.
///
/// Deserialized from a `[[source]]` table tagged with `type = "app"` or
/// `type = "token"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    App(AppSource),
    Token(TokenSource),
}

impl CredentialSource {
    pub fn name(&self) -> &str {
        match self {
            Self::App(app) => &app.name,
            Self::Token(token) => &token.name,
        }
    }

    pub fn patterns(&self) -> &[String] {
        match self {
            Self::App(app) => &app.patterns,
            Self::Token(token) => &token.patterns,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            Self::App(app) => app.priority,
            Self::Token(token) => token.priority,
        }
    }

    /// Kind of secret this source needs from the store.
    pub fn secret_kind(&self) -> SecretKind {
        match self {
            Self::App(_) => SecretKind::PrivateKey,
            Self::Token(_) => SecretKind::Token,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::App(_) => "app",
            Self::Token(_) => "token",
        }
    }
}

impl From<AppSource> for CredentialSource {
    fn from(app: AppSource) -> Self {
        Self::App(app)
    }
}

impl From<TokenSource> for CredentialSource {
    fn from(token: TokenSource) -> Self {
        Self::Token(token)
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} source '{}'", self.kind_label(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_ref_deserialize() {
        let r: SecretRef = toml::from_str("backend = \"filesystem\"\nid = \"ci\"").unwrap();
        assert_eq!(r, SecretRef::filesystem("ci"));
        assert_eq!(r.to_string(), "filesystem:ci");
    }

    #[test]
    fn test_source_accessors() {
        let source: CredentialSource = TokenSource {
            name: "personal".to_string(),
            username: None,
            patterns: vec!["github.com/me".to_string()],
            priority: 3,
            token: SecretRef::keyring("personal"),
        }
        .into();

        assert_eq!(source.name(), "personal");
        assert_eq!(source.priority(), 3);
        assert_eq!(source.secret_kind(), SecretKind::Token);
        assert_eq!(source.to_string(), "token source 'personal'");
    }
}
