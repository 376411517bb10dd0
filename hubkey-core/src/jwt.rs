//! GitHub App assertion minting.
//!
//! GitHub authenticates an App with a short-lived RS256 JWT whose issuer is
//! the App ID. [`JwtMinter`] back-dates `iat` by a clock-skew allowance and
//! keeps `exp - iat` within the ten minutes GitHub accepts.

use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::store::Secret;

/// Longest assertion lifetime GitHub accepts, in seconds.
pub const MAX_LIFETIME_SECS: i64 = 600;

/// Default back-dating of `iat`, in seconds.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 60;

/// Error type for assertion minting.
///
/// Neither variant is retryable: malformed input stays malformed.
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid GitHub App ID {app_id}: must be a positive integer")]
    InvalidAppId { app_id: i64 },

    #[error("private key is not a usable RSA key (PKCS#1 or PKCS#8 PEM): {message}")]
    InvalidKey { message: String },
}

/// Claims GitHub expects in an App JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Signs App assertions from PEM private keys.
#[derive(Clone)]
pub struct JwtMinter {
    clock: Arc<dyn Clock>,
    lifetime: Duration,
    clock_skew: Duration,
}

impl JwtMinter {
    /// Create a minter with the wall clock and default policy.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            lifetime: Duration::seconds(MAX_LIFETIME_SECS),
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
        }
    }

    /// Override lifetime and skew. The lifetime is capped at [`MAX_LIFETIME_SECS`].
    pub fn with_policy(mut self, lifetime: Duration, clock_skew: Duration) -> Self {
        self.lifetime = lifetime.min(Duration::seconds(MAX_LIFETIME_SECS));
        self.clock_skew = clock_skew;
        self
    }

    /// Claims that [`mint`](Self::mint) would sign right now.
    pub fn claims(&self, app_id: i64) -> Result<AppClaims, JwtError> {
        if app_id <= 0 {
            return Err(JwtError::InvalidAppId { app_id });
        }
        let iat = self.clock.now() - self.clock_skew;
        Ok(AppClaims {
            iat: iat.timestamp(),
            exp: (iat + self.lifetime).timestamp(),
            iss: app_id.to_string(),
        })
    }

    /// Sign an assertion for `app_id` with an RSA private key.
    pub fn mint(&self, app_id: i64, private_key_pem: &Secret) -> Result<Secret, JwtError> {
        let claims = self.claims(app_id)?;

        let key = encoding_key(private_key_pem)?;

        let token = encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| {
            JwtError::InvalidKey {
                message: e.to_string(),
            }
        })?;

        tracing::debug!(app_id, exp = claims.exp, "minted app assertion");
        Ok(Secret::new(token))
    }
}

/// Check that `private_key_pem` is an RSA key that assertions can be signed with.
///
/// PEM decoding alone accepts malformed DER, so this signs a throwaway claim.
pub fn validate_key(private_key_pem: &Secret) -> Result<(), JwtError> {
    let key = encoding_key(private_key_pem)?;
    let probe = AppClaims {
        iat: 0,
        exp: 0,
        iss: "probe".to_string(),
    };
    encode(&Header::new(Algorithm::RS256), &probe, &key)
        .map(|_| ())
        .map_err(|e| JwtError::InvalidKey {
            message: e.to_string(),
        })
}

fn encoding_key(private_key_pem: &Secret) -> Result<EncodingKey, JwtError> {
    EncodingKey::from_rsa_pem(private_key_pem.expose().as_bytes()).map_err(|e| {
        JwtError::InvalidKey {
            message: e.to_string(),
        }
    })
}

impl Default for JwtMinter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JwtMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtMinter")
            .field("lifetime", &self.lifetime)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}
