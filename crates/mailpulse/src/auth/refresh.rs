//! OAuth2 `refresh_token` grant.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use super::RefreshError;
use crate::config::CredentialsConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum length of error response body to include in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: SecretString,
    /// Set when the endpoint rotated the refresh token.
    pub refresh_token: Option<SecretString>,
    pub expires_in: Duration,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<RefreshedToken, RefreshError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let cut: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", cut)
    } else {
        body.to_string()
    }
}

/// Classifies a failed token response.
fn classify_failure(status: StatusCode, body: &str) -> RefreshError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return RefreshError::Unavailable(format!("{}: {}", status, truncate_body(body)));
    }

    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) if err.error == "invalid_grant" => RefreshError::Revoked(
            err.error_description
                .unwrap_or_else(|| "invalid_grant".to_string()),
        ),
        Ok(err) => RefreshError::Rejected(match err.error_description {
            Some(desc) => format!("{}: {}", err.error, desc),
            None => err.error,
        }),
        Err(_) => RefreshError::Rejected(format!("{}: {}", status, truncate_body(body))),
    }
}

pub struct OAuthRefreshClient {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
}

impl OAuthRefreshClient {
    pub fn new(token_url: &str, client_id: &str, client_secret: SecretString) -> Result<Self, RefreshError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RefreshError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret,
        })
    }

    /// Builds the client from config, resolving the client secret.
    pub fn from_config(config: &CredentialsConfig) -> crate::error::Result<Self> {
        let secret = config.client_secret.resolve()?;
        Ok(Self::new(&config.token_url, &config.client_id, secret)?)
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefreshClient {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<RefreshedToken, RefreshError> {
        debug!("Refreshing access token");

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("refresh_token", refresh_token.expose_secret()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| RefreshError::Unavailable(format!("Token refresh failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            RefreshError::Rejected(format!("Failed to parse refresh response: {}", e))
        })?;

        info!("Successfully refreshed access token");
        Ok(RefreshedToken {
            access_token: SecretString::from(token.access_token),
            refresh_token: token.refresh_token.map(SecretString::from),
            expires_in: token
                .expires_in
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_EXPIRES_IN),
        })
    }
}
