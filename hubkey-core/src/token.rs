//! Installation token types.
//!
//! This module provides:
//! - [`InstallationToken`] - A token issued for one App installation
//! - [`Installation`] - An installation as listed by the GitHub API
//! - [`TokenError`] - Failures while obtaining a token

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::jwt::JwtError;
use crate::store::Secret;

/// Error type for token operations.
///
/// No variant carries the assertion or any part of a token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The App assertion could not be minted.
    #[error("cannot sign app assertion")]
    Assertion(#[from] JwtError),

    /// GitHub answered with a non-success status.
    #[error("GitHub returned {status} for installation {installation_id}{}", remote_message(.message))]
    Exchange {
        installation_id: u64,
        status: u16,
        message: Option<String>,
    },

    /// Listing installations failed.
    #[error("GitHub returned {status} while listing installations{}", remote_message(.message))]
    Listing { status: u16, message: Option<String> },

    /// The request never produced a response.
    #[error("network error talking to GitHub: {message}")]
    Network { message: String },

    /// The response body was not what the API documents.
    #[error("unexpected response from GitHub: {message}")]
    InvalidResponse { message: String },

    /// The App is not installed on the requested owner.
    #[error("app {app_id} has no installation for '{owner}'")]
    InstallationNotFound { app_id: i64, owner: String },

    /// The request carried no owner to discover an installation for.
    #[error("app {app_id} has no installation_id and the request has no owner path segment")]
    OwnerUnknown { app_id: i64 },

    /// The HTTP client could not be built.
    #[error("HTTP client error: {message}")]
    Client { message: String },
}

fn remote_message(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {}", m))
        .unwrap_or_default()
}

/// An installation access token and its expiry.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationToken {
    pub token: Secret,
    pub expires_at: DateTime<Utc>,
}

impl InstallationToken {
    /// Whether the token is still usable at `now` with `margin` to spare.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now < self.expires_at - margin
    }
}

/// A token cached for one installation.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub installation_id: u64,
    pub value: Secret,
    pub expires_at: DateTime<Utc>,
}

/// Installation account as listed by `GET /app/installations`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstallationAccount {
    pub login: String,
}

/// An App installation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Installation {
    pub id: u64,
    pub account: InstallationAccount,
}
