//! Authorization-code exchange.

use crate::config::{HostSite, ProviderConfig};
use crate::error::{AuthFlowError, ConfigError};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Upper bound on the back-channel exchange.
pub const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(45);

/// Redirects followed by the token request before giving up.
pub const MAX_TOKEN_REDIRECTS: usize = 5;

/// Body of the token endpoint response.
///
/// Either `access_token` or `error` is expected; both are optional so a
/// partial or empty body still decodes.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenResponse {
    /// Decodes a response body. Bodies that are not JSON objects decode as an
    /// empty response, which later fails as a missing access token.
    #[must_use]
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    /// Returns the access token, or the error the provider reported.
    ///
    /// # Errors
    ///
    /// `Provider` when the response carries an `error`, `MissingAccessToken`
    /// when the token is absent or empty.
    pub fn into_access_token(self) -> Result<String, AuthFlowError> {
        if let Some(error) = self.error.filter(|e| !e.is_empty()) {
            return Err(AuthFlowError::Provider {
                error,
                description: self.error_description.filter(|d| !d.is_empty()),
            });
        }

        self.access_token
            .filter(|token| !token.is_empty())
            .ok_or(AuthFlowError::MissingAccessToken)
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .finish()
    }
}

/// Exchanges an authorization code for a token response.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Performs the exchange. Never retried: codes are single-use.
    async fn exchange(&self, code: &str) -> Result<TokenResponse, AuthFlowError>;
}

/// Token client backed by `reqwest`.
///
/// Certificate verification is always on; the client exposes no way to
/// disable it.
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl TokenClient {
    /// Creates a client for the provider's token endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &ProviderConfig, site: &HostSite) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_EXCHANGE_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_TOKEN_REDIRECTS))
            .build()
            .map_err(|e| ConfigError::HttpClient {
                details: e.to_string(),
            })?;

        Ok(Self {
            http,
            endpoint: config.token_endpoint(),
            client_id: config.client_id().to_string(),
            client_secret: config.client_secret().to_string(),
            redirect_uri: site.callback_url(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClient")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

#[async_trait]
impl TokenExchange for TokenClient {
    #[instrument(skip(self, code), fields(endpoint = %self.endpoint))]
    async fn exchange(&self, code: &str) -> Result<TokenResponse, AuthFlowError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self
            .http
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Token exchange request failed");
                AuthFlowError::Transport {
                    reason: e.to_string(),
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            warn!(error = %e, %status, "Failed to read token response body");
            AuthFlowError::Transport {
                reason: e.to_string(),
            }
        })?;

        debug!(%status, "Token endpoint responded");
        Ok(TokenResponse::from_body(&body))
    }
}
