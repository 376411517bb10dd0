//! GitHub REST client for App installation tokens.
//!
//! Only the two App endpoints hubkey needs are covered:
//! - `POST /app/installations/{id}/access_tokens`
//! - `GET /app/installations`
//!
//! Each request is a single attempt bounded by the client timeout.

use std::time::Duration;

use reqwest::{Response, StatusCode, header};
use serde::Deserialize;

use crate::store::Secret;
use crate::token::{Installation, InstallationToken, TokenError};

/// Public GitHub API base.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;
const MAX_REMOTE_MESSAGE: usize = 200;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Minimal GitHub App API client.
#[derive(Debug, Clone)]
pub struct GitHubApi {
    client: reqwest::Client,
    base_url: String,
}

impl GitHubApi {
    /// Create a client for `base_url` (e.g. `https://api.github.com` or a
    /// GitHub Enterprise `https://ghe.example.com/api/v3`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hubkey/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TokenError::Client {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str, jwt: &Secret) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(jwt.expose())
    }

    /// Exchange an App assertion for an installation access token.
    pub async fn create_installation_token(
        &self,
        installation_id: u64,
        jwt: &Secret,
    ) -> Result<InstallationToken, TokenError> {
        let path = format!("/app/installations/{}/access_tokens", installation_id);
        let response = self
            .request(reqwest::Method::POST, &path, jwt)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::Exchange {
                installation_id,
                status: status.as_u16(),
                message: remote_message(response).await,
            });
        }

        let token: InstallationToken =
            response
                .json()
                .await
                .map_err(|e| TokenError::InvalidResponse {
                    message: format!("access token body: {}", e.without_url()),
                })?;

        tracing::debug!(
            installation_id,
            expires_at = %token.expires_at,
            token = %token.token.describe(),
            "issued installation token"
        );
        Ok(token)
    }

    /// List every installation of the App, following pagination.
    pub async fn list_installations(&self, jwt: &Secret) -> Result<Vec<Installation>, TokenError> {
        let mut installations = Vec::new();

        for page in 1.. {
            let path = format!("/app/installations?per_page={}&page={}", PAGE_SIZE, page);
            let response = self
                .request(reqwest::Method::GET, &path, jwt)
                .send()
                .await
                .map_err(network_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(TokenError::Listing {
                    status: status.as_u16(),
                    message: remote_message(response).await,
                });
            }

            let batch: Vec<Installation> =
                response
                    .json()
                    .await
                    .map_err(|e| TokenError::InvalidResponse {
                        message: format!("installation list: {}", e.without_url()),
                    })?;

            let last = batch.len() < PAGE_SIZE;
            installations.extend(batch);
            if last {
                break;
            }
        }

        Ok(installations)
    }

    /// Find the installation on `owner` (user or organization login).
    pub async fn find_installation(
        &self,
        jwt: &Secret,
        owner: &str,
    ) -> Result<Option<Installation>, TokenError> {
        let installations = self.list_installations(jwt).await?;
        Ok(installations
            .into_iter()
            .find(|i| i.account.login.eq_ignore_ascii_case(owner)))
    }
}

fn network_error(err: reqwest::Error) -> TokenError {
    let message = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.without_url().to_string()
    };
    TokenError::Network { message }
}

async fn remote_message(response: Response) -> Option<String> {
    if response.status() == StatusCode::NO_CONTENT {
        return None;
    }
    let body: ErrorBody = response.json().await.ok()?;
    body.message
        .map(|m| m.chars().take(MAX_REMOTE_MESSAGE).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> GitHubApi {
        GitHubApi::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_create_installation_token_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/installations/42/access_tokens"))
            .and(header_is("authorization", "Bearer eyJ.test.jwt"))
            .and(header_is("accept", "application/vnd.github+json"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "token": "ghs_issued",
                "expires_at": "2030-01-01T01:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = api(&server)
            .create_installation_token(42, &Secret::new("eyJ.test.jwt"))
            .await
            .unwrap();
        assert_eq!(token.token.expose(), "ghs_issued");
    }

    #[tokio::test]
    async fn test_exchange_failure_carries_status_not_jwt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "message": "A JSON web token could not be decoded"
            })))
            .mount(&server)
            .await;

        let jwt = Secret::new("eyJhbGciOiJSUzI1NiJ9.payload-secret.signature");
        let err = api(&server)
            .create_installation_token(9, &jwt)
            .await
            .unwrap_err();

        assert!(matches!(err, TokenError::Exchange { status: 401, .. }));
        let text = err.to_string();
        assert!(text.contains("401"));
        assert!(!text.contains("payload-secret"));
    }

    #[tokio::test]
    async fn test_find_installation_follows_pages() {
        let server = MockServer::start().await;
        let first_page: Vec<_> = (0..100)
            .map(|i| serde_json::json!({"id": i, "account": {"login": format!("org{}", i)}}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/app/installations"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first_page))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/app/installations"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 777, "account": {"login": "Acme"}}
            ])))
            .mount(&server)
            .await;

        let found = api(&server)
            .find_installation(&Secret::new("jwt"), "acme")
            .await
            .unwrap();
        assert_eq!(found.map(|i| i.id), Some(777));
    }
}
