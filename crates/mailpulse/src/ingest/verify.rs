//! Push delivery authentication.
//!
//! A delivery is authentic when it carries a bearer token the identity
//! provider vouches for, or when it comes from an allow-listed domain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use super::WebhookError;
use crate::clock::Clock;
use crate::config::WebhookConfig;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Token rejected: {0}")]
    Invalid(String),

    #[error("Token verification unavailable: {0}")]
    Unavailable(String),
}

/// Claims of a push token, as reported by the identity provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushTokenClaims {
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub aud: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub email_verified: bool,
    #[serde(default, deserialize_with = "flexible_i64")]
    pub exp: i64,
}

/// Token-info endpoints render every claim as a string.
fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => b,
        Raw::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

fn flexible_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(D::Error::custom),
    }
}

/// Resolves a raw bearer token into claims. Signature checking is the
/// implementation's job; claim policy is applied by [`WebhookAuthenticator`].
#[async_trait]
pub trait PushTokenVerifier: Send + Sync {
    async fn claims(&self, token: &str) -> Result<PushTokenClaims, VerifyError>;
}

/// Asks the provider's token-info endpoint to validate the signature.
pub struct TokenInfoVerifier {
    client: reqwest::Client,
    endpoint: String,
}

impl TokenInfoVerifier {
    pub fn new(endpoint: &str) -> Result<Self, VerifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VerifyError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl PushTokenVerifier for TokenInfoVerifier {
    async fn claims(&self, token: &str) -> Result<PushTokenClaims, VerifyError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(|e| VerifyError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(VerifyError::Unavailable(format!("token info returned {}", status)));
        }
        if !status.is_success() {
            return Err(VerifyError::Invalid(format!("token info returned {}", status)));
        }

        response
            .json::<PushTokenClaims>()
            .await
            .map_err(|e| VerifyError::Invalid(format!("unreadable token info: {}", e)))
    }
}

pub struct WebhookAuthenticator {
    verifier: Option<Arc<dyn PushTokenVerifier>>,
    accepted_issuers: Vec<String>,
    audience: Option<String>,
    service_account_email: Option<String>,
    allowed_domains: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl WebhookAuthenticator {
    /// `verifier` is `None` when bearer verification is disabled.
    pub fn new(
        config: &WebhookConfig,
        verifier: Option<Arc<dyn PushTokenVerifier>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            verifier,
            accepted_issuers: config.accepted_issuers.clone(),
            audience: config.audience.clone(),
            service_account_email: config.service_account_email.clone(),
            allowed_domains: config
                .allowed_domains
                .iter()
                .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            clock,
        }
    }

    /// Builds the authenticator the config asks for, with a token-info
    /// verifier when bearer checks are enabled.
    pub fn from_config(config: &WebhookConfig, clock: Arc<dyn Clock>) -> Result<Self, VerifyError> {
        let verifier: Option<Arc<dyn PushTokenVerifier>> = if config.verify_bearer {
            Some(Arc::new(TokenInfoVerifier::new(&config.token_info_url)?))
        } else {
            None
        };
        Ok(Self::new(config, verifier, clock))
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<(), WebhookError> {
        if let (Some(verifier), Some(token)) = (&self.verifier, bearer_token(headers)) {
            let claims = verifier.claims(token).await.map_err(|e| match e {
                VerifyError::Invalid(reason) => WebhookError::Unauthorized(reason),
                VerifyError::Unavailable(reason) => WebhookError::Internal(reason),
            })?;
            return self.check_claims(&claims);
        }

        if self.allowed_domains.is_empty() {
            return Err(WebhookError::Unauthorized(
                "missing bearer token".to_string(),
            ));
        }

        match delivery_host(headers) {
            Some(host) if self.domain_allowed(&host) => Ok(()),
            Some(host) => Err(WebhookError::Forbidden(format!(
                "origin '{}' is not allowed",
                host
            ))),
            None => Err(WebhookError::Forbidden("no origin".to_string())),
        }
    }

    fn check_claims(&self, claims: &PushTokenClaims) -> Result<(), WebhookError> {
        let reject = |reason: String| Err(WebhookError::Unauthorized(reason));

        if !self.accepted_issuers.iter().any(|iss| iss == &claims.iss) {
            return reject(format!("untrusted issuer '{}'", claims.iss));
        }
        if claims.exp <= self.clock.now().timestamp() {
            return reject("token expired".to_string());
        }
        if !claims.email_verified {
            return reject("email not verified".to_string());
        }
        if let Some(audience) = &self.audience {
            if &claims.aud != audience {
                return reject(format!("unexpected audience '{}'", claims.aud));
            }
        }
        if let Some(expected) = &self.service_account_email {
            if claims.email.as_deref() != Some(expected.as_str()) {
                return reject("unexpected service account".to_string());
            }
        }
        Ok(())
    }

    fn domain_allowed(&self, host: &str) -> bool {
        self.allowed_domains.iter().any(|domain| {
            host == domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Host of the `Origin` header, falling back to `Referer`.
fn delivery_host(headers: &HeaderMap) -> Option<String> {
    [header::ORIGIN, header::REFERER]
        .iter()
        .filter_map(|name| headers.get(name)?.to_str().ok())
        .find_map(host_of)
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = authority.split(':').next()?.trim();
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}
