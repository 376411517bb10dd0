//! In-process installation token cache.
//!
//! [`InstallationTokenCache`] keeps one token per installation ID and serves
//! it until `expires_at - safety_margin`. Refreshes are single-flight: the
//! first caller for an installation performs the exchange while concurrent
//! callers for the same installation wait on its lock and then reuse the
//! result. Different installations never contend.
//!
//! The cache lives only as long as the process. Separate helper processes
//! each exchange their own token.
//!
//! # Example
//!
//! ```rust,ignore
//! let cache = InstallationTokenCache::new(api);
//! let token = cache
//!     .get_token(installation_id, || minter.mint(app_id, &private_key))
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::github::GitHubApi;
use crate::jwt::JwtError;
use crate::store::Secret;
use crate::token::{CachedToken, TokenError};

/// Default safety margin in seconds.
///
/// A token is treated as expired this long before GitHub says it is, which
/// covers clock skew and the time git spends using it.
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 300;

/// Caches installation tokens with single-flight refresh.
pub struct InstallationTokenCache {
    api: GitHubApi,
    clock: Arc<dyn Clock>,
    safety_margin: Duration,
    entries: Mutex<HashMap<u64, CachedToken>>,
    refresh_locks: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
    discovered: Mutex<HashMap<(i64, String), u64>>,
}

impl InstallationTokenCache {
    /// Create a cache using the wall clock and the default safety margin.
    pub fn new(api: GitHubApi) -> Self {
        Self::with_clock(api, Arc::new(SystemClock))
    }

    pub fn with_clock(api: GitHubApi, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            clock,
            safety_margin: Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
            entries: Mutex::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
            discovered: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    pub fn api(&self) -> &GitHubApi {
        &self.api
    }

    /// Return a usable token for `installation_id`.
    ///
    /// `assertion` is called only when an exchange is actually needed.
    /// Failures are not cached and are not retried.
    pub async fn get_token<F>(&self, installation_id: u64, assertion: F) -> Result<Secret, TokenError>
    where
        F: FnOnce() -> Result<Secret, JwtError>,
    {
        if let Some(token) = self.fresh(installation_id) {
            tracing::debug!(installation_id, "installation token served from cache");
            return Ok(token);
        }

        let lock = self.refresh_lock(installation_id);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.fresh(installation_id) {
            tracing::debug!(installation_id, "installation token refreshed by concurrent caller");
            return Ok(token);
        }

        let jwt = assertion()?;
        let issued = self.api.create_installation_token(installation_id, &jwt).await?;

        if !issued.is_fresh(self.clock.now(), self.safety_margin) {
            tracing::warn!(
                installation_id,
                expires_at = %issued.expires_at,
                "issued token expires within the safety margin"
            );
        }

        let value = issued.token.clone();
        self.entries.lock().insert(
            installation_id,
            CachedToken {
                installation_id,
                value: issued.token,
                expires_at: issued.expires_at,
            },
        );
        tracing::info!(installation_id, expires_at = %issued.expires_at, "cached installation token");
        Ok(value)
    }

    /// Resolve the installation of `app_id` on `owner`, memoised per process.
    pub async fn discover_installation<F>(
        &self,
        app_id: i64,
        owner: &str,
        assertion: F,
    ) -> Result<u64, TokenError>
    where
        F: FnOnce() -> Result<Secret, JwtError>,
    {
        let memo_key = (app_id, owner.to_lowercase());
        let known = self.discovered.lock().get(&memo_key).copied();
        if let Some(id) = known {
            return Ok(id);
        }

        let jwt = assertion()?;
        let installation = self
            .api
            .find_installation(&jwt, owner)
            .await?
            .ok_or_else(|| TokenError::InstallationNotFound {
                app_id,
                owner: owner.to_string(),
            })?;

        tracing::info!(app_id, owner, installation_id = installation.id, "discovered installation");
        self.discovered.lock().insert(memo_key, installation.id);
        Ok(installation.id)
    }

    /// Drop any cached token for `installation_id`.
    pub fn invalidate(&self, installation_id: u64) {
        self.entries.lock().remove(&installation_id);
    }

    fn fresh(&self, installation_id: u64) -> Option<Secret> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(&installation_id)
            .filter(|cached| now < cached.expires_at - self.safety_margin)
            .map(|cached| cached.value.clone())
    }

    fn refresh_lock(&self, installation_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .lock()
            .entry(installation_id)
            .or_default()
            .clone()
    }
}

impl std::fmt::Debug for InstallationTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationTokenCache")
            .field("api", &self.api.base_url())
            .field("safety_margin", &self.safety_margin)
            .field("cached", &self.entries.lock().len())
            .finish()
    }
}
