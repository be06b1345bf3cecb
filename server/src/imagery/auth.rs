//! OAuth client-credentials token provider for Sentinel Hub

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SentinelConfig;

/// Errors raised while obtaining an access token
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Client id or secret not configured")]
    MissingCredentials,

    #[error("Token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Token endpoint did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Token request failed: {0}")]
    Transport(String),

    #[error("Malformed token response: {0}")]
    MalformedResponse(String),
}

/// Short-lived bearer token; the value never appears in `Debug` output
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_in: Option<Duration>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            expires_in,
        }
    }

    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_in
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Source of bearer tokens for upstream imagery calls
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Obtain a fresh token. One attempt, no caching.
    async fn fetch_token(&self) -> Result<AccessToken, AuthError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Client-credentials grant against a fixed token endpoint
pub struct ClientCredentialsProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    timeout: Duration,
}

impl ClientCredentialsProvider {
    pub fn new(client: reqwest::Client, config: &SentinelConfig) -> Self {
        Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            timeout: config.request_timeout,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn fetch_token(&self) -> Result<AccessToken, AuthError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret)
        else {
            return Err(AuthError::MissingCredentials);
        };

        let start = Instant::now();
        counter!("fieldwatch_token_requests_total").increment(1);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::Timeout(self.timeout)
                } else {
                    AuthError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Token endpoint rejected credentials: {} {}", status, body);
            counter!("fieldwatch_token_failures_total").increment(1);
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(AuthError::MalformedResponse(
                "empty access_token".to_string(),
            ));
        }

        histogram!("fieldwatch_token_request_duration_seconds").record(start.elapsed());
        debug!("Obtained access token (expires_in={:?}s)", token.expires_in);

        Ok(AccessToken::new(
            token.access_token,
            token.expires_in.map(Duration::from_secs),
        ))
    }
}
