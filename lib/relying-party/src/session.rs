//! Host session and access-token cookie lifecycle.
//!
//! The access-token cookie exists only so logout can hand the token back to
//! Casdoor as `id_token_hint`. It is written once per login and cleared on
//! every logout, whether or not it was present.

use crate::account::LocalAccount;
use crate::config::ProviderConfig;
use crate::error::AuthFlowError;
use crate::redirect::RedirectValidator;
use async_trait::async_trait;
use casdoor_sso_core::{AccountId, StoreError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};
use url::Url;

/// Cookie holding the Casdoor access token between login and logout.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token_cookie";

/// Cookie holding the host session token.
pub const HOST_SESSION_COOKIE: &str = "session";

/// Lifetime of the access-token cookie.
pub const ACCESS_TOKEN_TTL: time::Duration = time::Duration::hours(24);

const LOGIN_EVENT_CAPACITY: usize = 64;

/// SameSite attribute of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

/// A cookie to set or remove, independent of any web framework.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieDirective {
    pub name: &'static str,
    pub value: String,
    pub max_age: time::Duration,
    pub path: &'static str,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSitePolicy,
}

impl CookieDirective {
    /// True when this directive deletes the cookie.
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.value.is_empty() && self.max_age <= time::Duration::ZERO
    }
}

impl fmt::Debug for CookieDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieDirective")
            .field("name", &self.name)
            .field("value", &if self.value.is_empty() { "" } else { "<redacted>" })
            .field("max_age", &self.max_age)
            .field("path", &self.path)
            .field("domain", &self.domain)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("same_site", &self.same_site)
            .finish()
    }
}

/// An authenticated host session.
#[derive(Clone, PartialEq, Eq)]
pub struct HostSession {
    token: String,
    account_id: AccountId,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl HostSession {
    #[must_use]
    pub fn with_all_fields(
        token: String,
        account_id: AccountId,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            account_id,
            created_at,
            expires_at,
        }
    }

    /// Opaque token stored in the host session cookie.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl fmt::Debug for HostSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSession")
            .field("token", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Host-owned session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Starts a session for `account_id` lasting until `expires_at`.
    async fn start(
        &self,
        account_id: AccountId,
        expires_at: DateTime<Utc>,
    ) -> casdoor_sso_core::Result<HostSession, StoreError>;

    /// Looks up a session by token. Expired sessions may still be returned.
    async fn resolve(&self, token: &str)
    -> casdoor_sso_core::Result<Option<HostSession>, StoreError>;

    /// Ends a session. Ending an unknown session is not an error.
    async fn end(&self, token: &str) -> casdoor_sso_core::Result<(), StoreError>;
}

/// Broadcast after a session is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginEvent {
    pub account_id: AccountId,
    pub username: String,
    pub created: bool,
    pub at: DateTime<Utc>,
}

/// Inputs to a logout.
#[derive(Clone, Default)]
pub struct LogoutRequest {
    /// The `redirect_to` request parameter.
    pub redirect_to: Option<String>,
    /// Value of the access-token cookie, if present.
    pub access_token: Option<String>,
    /// Value of the host session cookie, if present.
    pub host_session: Option<String>,
}

/// Where logout sends the browser and which cookies it clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutOutcome {
    pub location: String,
    pub clear_access_token: CookieDirective,
    pub clear_host_session: CookieDirective,
    /// True when the browser is sent to Casdoor to end the provider session.
    pub provider_logout: bool,
}

/// Establishes and tears down sessions.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    redirects: RedirectValidator,
    provider: Arc<ProviderConfig>,
    session_ttl: chrono::Duration,
    events: broadcast::Sender<LoginEvent>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        redirects: RedirectValidator,
        provider: Arc<ProviderConfig>,
    ) -> Self {
        let (events, _) = broadcast::channel(LOGIN_EVENT_CAPACITY);
        Self {
            store,
            redirects,
            provider,
            session_ttl: chrono::Duration::hours(24),
            events,
        }
    }

    /// Sets the host session lifetime.
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> chrono::Duration {
        self.session_ttl
    }

    /// Subscribes to login events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LoginEvent> {
        self.events.subscribe()
    }

    /// Cookie carrying `token` for later RP-initiated logout.
    #[must_use]
    pub fn access_token_cookie(&self, token: &str) -> CookieDirective {
        self.cookie(ACCESS_TOKEN_COOKIE, token.to_string(), ACCESS_TOKEN_TTL)
    }

    /// Removal directive with the same attributes as the access-token cookie.
    #[must_use]
    pub fn clear_access_token_cookie(&self) -> CookieDirective {
        self.cookie(ACCESS_TOKEN_COOKIE, String::new(), time::Duration::ZERO)
    }

    /// Cookie carrying the host session token.
    #[must_use]
    pub fn host_session_cookie(&self, session: &HostSession) -> CookieDirective {
        let remaining = (session.expires_at() - Utc::now()).num_seconds().max(0);
        self.cookie(
            HOST_SESSION_COOKIE,
            session.token().to_string(),
            time::Duration::seconds(remaining),
        )
    }

    #[must_use]
    pub fn clear_host_session_cookie(&self) -> CookieDirective {
        self.cookie(HOST_SESSION_COOKIE, String::new(), time::Duration::ZERO)
    }

    fn cookie(&self, name: &'static str, value: String, max_age: time::Duration) -> CookieDirective {
        let site = self.redirects.site();
        CookieDirective {
            name,
            value,
            max_age,
            path: "/",
            domain: Some(site.canonical_host().to_string()),
            secure: site.is_tls(),
            http_only: true,
            same_site: SameSitePolicy::Lax,
        }
    }

    /// Returns the live session for `token`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn current(
        &self,
        token: &str,
    ) -> casdoor_sso_core::Result<Option<HostSession>, StoreError> {
        let session = self.store.resolve(token).await?;
        Ok(session.filter(|s| !s.is_expired()))
    }

    /// Starts a host session for `account` and announces the login.
    ///
    /// # Errors
    ///
    /// Returns `AuthFlowError::Session` if the session store fails.
    #[instrument(skip(self, account), fields(account_id = %account.id()))]
    pub async fn establish(
        &self,
        account: &LocalAccount,
        created: bool,
    ) -> Result<HostSession, AuthFlowError> {
        let now = Utc::now();
        let session = self
            .store
            .start(account.id(), now + self.session_ttl)
            .await
            .map_err(|report| {
                error!(error = %report, "Failed to start host session");
                AuthFlowError::Session {
                    reason: report.to_string(),
                }
            })?;

        // No subscribers is fine.
        let _ = self.events.send(LoginEvent {
            account_id: account.id(),
            username: account.username().to_string(),
            created,
            at: now,
        });

        Ok(session)
    }

    /// Ends the local session and decides where the browser goes next.
    ///
    /// The access-token cookie is always cleared. When a token was present
    /// and the integration is active the browser is sent to Casdoor's logout
    /// endpoint; otherwise straight to the post-logout target. Host session
    /// teardown failures are logged and never block logout.
    #[instrument(skip_all, fields(has_token = request.access_token.is_some()))]
    pub async fn logout(&self, request: LogoutRequest) -> LogoutOutcome {
        let site = self.redirects.site();
        let home = site.home_url();
        let target = match request.redirect_to.as_deref() {
            Some(candidate) if !candidate.trim().is_empty() => {
                self.redirects.validate(candidate, &home)
            }
            _ => home,
        };

        if let Some(token) = request.host_session.as_deref().filter(|t| !t.is_empty())
            && let Err(report) = self.store.end(token).await
        {
            warn!(error = %report, "Failed to end host session, continuing logout");
        }

        let token = request.access_token.filter(|t| !t.trim().is_empty());
        let provider_logout = token.is_some() && self.provider.is_active();

        let location = match token {
            Some(token) if provider_logout => {
                match self.provider_logout_url(&token, &site.absolute(&target)) {
                    Some(url) => self.redirects.safe_redirect(&url),
                    None => self.redirects.safe_redirect(&target),
                }
            }
            _ => self.redirects.safe_redirect(&target),
        };

        info!(provider_logout, "Logged out");
        LogoutOutcome {
            location,
            clear_access_token: self.clear_access_token_cookie(),
            clear_host_session: self.clear_host_session_cookie(),
            provider_logout,
        }
    }

    fn provider_logout_url(&self, token: &str, post_logout: &str) -> Option<String> {
        Url::parse_with_params(
            &self.provider.logout_endpoint(),
            &[
                ("id_token_hint", token),
                ("post_logout_redirect_uri", post_logout),
            ],
        )
        .map(String::from)
        .ok()
    }
}
