//! Redacted descriptions of secret values.
//!
//! Diagnostics that need to say *something* about a secret use
//! [`describe`], which reports only its detected category and length.

use std::fmt;

use crate::store::Secret;

/// Detected kind of a secret value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretCategory {
    PrivateKey,
    InstallationToken,
    PersonalAccessToken,
    OAuthToken,
    Jwt,
    Generic,
}

impl fmt::Display for SecretCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PrivateKey => "PEM private key",
            Self::InstallationToken => "GitHub installation token",
            Self::PersonalAccessToken => "GitHub personal access token",
            Self::OAuthToken => "GitHub OAuth token",
            Self::Jwt => "JWT",
            Self::Generic => "secret",
        };
        f.write_str(label)
    }
}

pub fn categorize(value: &str) -> SecretCategory {
    let value = value.trim();
    if value.starts_with("-----BEGIN") && value.contains("PRIVATE KEY-----") {
        SecretCategory::PrivateKey
    } else if value.starts_with("ghs_") {
        SecretCategory::InstallationToken
    } else if value.starts_with("ghp_") || value.starts_with("github_pat_") {
        SecretCategory::PersonalAccessToken
    } else if value.starts_with("gho_") || value.starts_with("ghu_") {
        SecretCategory::OAuthToken
    } else if value.starts_with("eyJ") && value.matches('.').count() == 2 {
        SecretCategory::Jwt
    } else {
        SecretCategory::Generic
    }
}

/// Describe a secret without revealing any of it, e.g.
/// `[REDACTED GitHub installation token, 40 chars]`.
pub fn describe(value: &str) -> String {
    format!(
        "[REDACTED {}, {} chars]",
        categorize(value),
        value.chars().count()
    )
}

impl Secret {
    /// Redacted description of this secret; see [`describe`].
    pub fn describe(&self) -> String {
        describe(self.expose())
    }
}
