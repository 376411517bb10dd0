//! Credential protocol handler.
//!
//! [`CredentialHelper`] runs one request/response cycle: decode the request,
//! resolve a source, obtain a secret from it and write the credential pair.
//! A request that matches no source is declined silently so git can fall
//! through to the next configured helper.

use std::io::{BufRead, Write};
use std::sync::Arc;

use crate::config::Config;
use crate::error::HubkeyError;
use crate::github::GitHubApi;
use crate::jwt::JwtMinter;
use crate::matcher::{LookupKey, SourceMatcher};
use crate::model::{AppSource, CredentialSource, DEFAULT_USERNAME, TokenSource};
use crate::protocol::{CredentialRequest, CredentialResponse, Operation};
use crate::store::{Secret, SecretKind, SecretsStore, StoreError, read_key_file};
use crate::token::TokenError;
use crate::token_cache::InstallationTokenCache;

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Credentials were written for the named source.
    Emitted { source: String },

    /// Nothing matched, or the request was not eligible; no output.
    Declined,

    /// `store` or `erase`; accepted without side effects.
    Ignored,
}

/// Resolves git credential requests against configured sources.
pub struct CredentialHelper {
    matcher: SourceMatcher,
    store: Arc<SecretsStore>,
    tokens: InstallationTokenCache,
    minter: JwtMinter,
    pattern_override: Option<String>,
}

impl CredentialHelper {
    pub fn new(
        sources: Vec<CredentialSource>,
        store: Arc<SecretsStore>,
        tokens: InstallationTokenCache,
        minter: JwtMinter,
    ) -> Result<Self, HubkeyError> {
        Ok(Self {
            matcher: SourceMatcher::new(sources)?,
            store,
            tokens,
            minter,
            pattern_override: None,
        })
    }

    /// Build a helper with the policy in `config.settings`.
    pub fn from_config(config: &Config, store: Arc<SecretsStore>) -> Result<Self, HubkeyError> {
        let settings = &config.settings;
        let api = GitHubApi::new(&settings.api_url, settings.http_timeout())?;
        let tokens = InstallationTokenCache::new(api).with_safety_margin(settings.safety_margin());
        let minter =
            JwtMinter::new().with_policy(settings.jwt_lifetime(), settings.jwt_clock_skew());
        Self::new(config.sources.clone(), store, tokens, minter)
    }

    /// Use `pattern` as the lookup key instead of the request's host/path.
    ///
    /// Set when the helper is registered under a path-scoped
    /// `credential.<url>.helper` entry.
    pub fn with_pattern_override(mut self, pattern: Option<String>) -> Self {
        self.pattern_override = pattern;
        self
    }

    pub fn matcher(&self) -> &SourceMatcher {
        &self.matcher
    }

    /// Run one protocol cycle for `op`.
    pub async fn handle<R, W>(&self, op: Operation, reader: R, writer: W) -> Result<Outcome, HubkeyError>
    where
        R: BufRead,
        W: Write,
    {
        if op != Operation::Get {
            tracing::debug!(operation = %op, "credentials are generated per request; nothing to do");
            return Ok(Outcome::Ignored);
        }

        let request = CredentialRequest::read_from(reader)?;
        tracing::trace!(
            protocol = ?request.protocol,
            host = ?request.host,
            path = ?request.path,
            "parsed credential request"
        );

        match self.resolve_request(&request).await? {
            Some((source, response)) => {
                response.write_to(writer)?;
                tracing::info!(source = %source, "emitted credentials");
                Ok(Outcome::Emitted { source })
            }
            None => Ok(Outcome::Declined),
        }
    }

    /// Resolve `request` to a credential pair without touching any stream.
    ///
    /// Returns `Ok(None)` for a silent decline.
    pub async fn resolve_request(
        &self,
        request: &CredentialRequest,
    ) -> Result<Option<(String, CredentialResponse)>, HubkeyError> {
        if request.is_insecure() {
            tracing::debug!(protocol = ?request.protocol, "declining non-https request");
            return Ok(None);
        }

        let key = request.lookup_key(self.pattern_override.as_deref())?;
        let Some(found) = self.matcher.resolve(&key) else {
            tracing::debug!(key = %key, "no source matched; declining");
            return Ok(None);
        };

        let response = match found.source {
            CredentialSource::App(app) => CredentialResponse {
                username: DEFAULT_USERNAME.to_string(),
                password: self.app_token(app, &key).await?,
            },
            CredentialSource::Token(token) => CredentialResponse {
                username: token
                    .username
                    .clone()
                    .or_else(|| request.username.clone())
                    .unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
                password: self.static_token(token).await?,
            },
        };

        tracing::debug!(
            source = found.source.name(),
            password = %response.password.describe(),
            "resolved credentials"
        );
        Ok(Some((found.source.name().to_string(), response)))
    }

    async fn app_token(&self, app: &AppSource, key: &LookupKey) -> Result<Secret, HubkeyError> {
        let pem = self.private_key(app).await?;
        let assertion = || self.minter.mint(app.app_id, &pem);

        let installation_id = match app.installation_id {
            0 => {
                let owner = key.owner().ok_or(TokenError::OwnerUnknown { app_id: app.app_id })?;
                self.tokens
                    .discover_installation(app.app_id, owner, assertion)
                    .await?
            }
            id => id,
        };

        tracing::debug!(source = %app.name, installation_id, "resolving installation token");
        Ok(self.tokens.get_token(installation_id, assertion).await?)
    }

    async fn private_key(&self, app: &AppSource) -> Result<Secret, HubkeyError> {
        if let Some(path) = &app.private_key_path {
            return Ok(read_key_file(path)?);
        }
        self.store
            .get_from(app.key.backend, &app.key.id, SecretKind::PrivateKey)
            .await
            .map_err(|e| missing_secret(e, "app", "import-key", &app.name))
    }

    async fn static_token(&self, token: &TokenSource) -> Result<Secret, HubkeyError> {
        self.store
            .get_from(token.token.backend, &token.token.id, SecretKind::Token)
            .await
            .map_err(|e| missing_secret(e, "token", "import-token", &token.name))
    }
}

fn missing_secret(
    err: StoreError,
    kind: &'static str,
    import_command: &'static str,
    name: &str,
) -> HubkeyError {
    match err {
        StoreError::NotFound { .. } => HubkeyError::SecretNotFound {
            name: name.to_string(),
            kind,
            import_command,
        },
        other => other.into(),
    }
}

impl std::fmt::Debug for CredentialHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHelper")
            .field("sources", &self.matcher.len())
            .field("tokens", &self.tokens)
            .field("pattern_override", &self.pattern_override)
            .finish()
    }
}
