//! The login flow state machine.
//!
//! `AuthFlowController` is the only entry point a host needs. It is
//! constructed once with its collaborators and called at two points:
//! when an unauthenticated request arrives and when the callback URL is
//! hit. Every callback ends in exactly one place, where the terminal state
//! is logged.

use crate::account::{AccountResolver, LocalAccount};
use crate::claims::IdentityExtractor;
use crate::config::ProviderConfig;
use crate::error::AuthFlowError;
use crate::redirect::{LoginRequest, RedirectValidator};
use crate::session::{CookieDirective, HostSession, LogoutOutcome, LogoutRequest, SessionManager};
use crate::token::TokenExchange;
use casdoor_sso_core::FlowId;
use std::fmt;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

/// Where a login flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowState {
    /// No login in progress.
    Anonymous,
    /// The browser was sent to Casdoor and the callback has not arrived.
    AwaitingCode,
    /// Exchanging the authorization code for a token.
    Exchanging,
    /// Mapping the identity onto a local account.
    Resolving,
    /// A host session exists.
    Authenticated,
    /// Terminal: the identity is not allowed to sign in.
    Denied,
    /// Terminal: the flow failed.
    Failed,
}

impl FlowState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Denied | Self::Failed)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Anonymous => "anonymous",
            Self::AwaitingCode => "awaiting_code",
            Self::Exchanging => "exchanging",
            Self::Resolving => "resolving",
            Self::Authenticated => "authenticated",
            Self::Denied => "denied",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A login attempt about to be sent to Casdoor.
///
/// Nothing is stored server-side; `state` round-trips through the provider
/// and carries the post-login target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    state: String,
    redirect_uri: String,
}

impl AuthorizationRequest {
    #[must_use]
    pub fn new(state: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Authorization endpoint URL with the request's query parameters.
    #[must_use]
    pub fn authorize_url(&self, config: &ProviderConfig) -> String {
        let params = [
            ("response_type", "code"),
            ("client_id", config.client_id()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("state", self.state.as_str()),
        ];
        match Url::parse_with_params(&config.authorize_endpoint(), &params) {
            Ok(url) => url.into(),
            // The backend was validated at load time.
            Err(_) => config.authorize_endpoint(),
        }
    }
}

/// Query parameters of the callback entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub redirect_to: Option<String>,
    /// Older links pass the target as `redirect_uri`.
    pub redirect_uri: Option<String>,
}

/// A completed login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub account: LocalAccount,
    pub created: bool,
    pub session: HostSession,
    pub access_token_cookie: CookieDirective,
    pub session_cookie: CookieDirective,
    pub location: String,
}

/// Result of hitting the callback entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// No code yet: the browser is sent to Casdoor.
    AwaitingCode { location: String },
    /// The user is signed in.
    Authenticated(Box<Authenticated>),
}

impl CallbackOutcome {
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::AwaitingCode { location } => location,
            Self::Authenticated(authenticated) => &authenticated.location,
        }
    }

    #[must_use]
    pub fn state(&self) -> FlowState {
        match self {
            Self::AwaitingCode { .. } => FlowState::AwaitingCode,
            Self::Authenticated(_) => FlowState::Authenticated,
        }
    }
}

/// Notices shown on the home page after a failed single sign-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowNotice {
    LoginOnly,
    SsoFailed,
    IdNotAllowed,
}

impl FlowNotice {
    /// Parses the `message` query parameter.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "casdoor_login_only" => Some(Self::LoginOnly),
            "casdoor_sso_failed" => Some(Self::SsoFailed),
            "casdoor_id_not_allowed" => Some(Self::IdNotAllowed),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LoginOnly => "casdoor_login_only",
            Self::SsoFailed => "casdoor_sso_failed",
            Self::IdNotAllowed => "casdoor_id_not_allowed",
        }
    }

    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::LoginOnly => {
                "This Casdoor account doesn't exist on this site. Please use another account."
            }
            Self::SsoFailed => {
                "Casdoor Single Sign-On failed. User mismatch or conflict with existing data."
            }
            Self::IdNotAllowed => "For security reasons, this user cannot use Single Sign-On.",
        }
    }
}

/// Orchestrates login, callback and logout.
#[derive(Clone)]
pub struct AuthFlowController {
    config: Arc<ProviderConfig>,
    redirects: RedirectValidator,
    tokens: Arc<dyn TokenExchange>,
    identities: IdentityExtractor,
    resolver: AccountResolver,
    sessions: SessionManager,
}

impl AuthFlowController {
    #[must_use]
    pub fn new(
        config: Arc<ProviderConfig>,
        redirects: RedirectValidator,
        tokens: Arc<dyn TokenExchange>,
        resolver: AccountResolver,
        sessions: SessionManager,
    ) -> Self {
        Self {
            config,
            redirects,
            tokens,
            identities: IdentityExtractor,
            resolver,
            sessions,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    #[must_use]
    pub fn redirects(&self) -> &RedirectValidator {
        &self.redirects
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn resolver(&self) -> &AccountResolver {
        &self.resolver
    }

    /// Builds the authorize redirect carrying `target_hint` as `state`.
    ///
    /// The hint must already be validated; the returned location has passed
    /// the safe-redirect allow-list.
    #[must_use]
    pub fn start_login(&self, target_hint: &str) -> String {
        let request =
            AuthorizationRequest::new(target_hint, self.redirects.site().callback_url());
        let location = self.redirects.safe_redirect(&request.authorize_url(&self.config));
        debug!(state = %FlowState::AwaitingCode, target = %target_hint, "Starting login");
        location
    }

    /// Host login entry point. Returns the authorize redirect unless the
    /// integration is inactive or the action is a logout.
    #[must_use]
    pub fn on_login_entry(&self, action: Option<&str>, request: &LoginRequest) -> Option<String> {
        if !self.config.is_active() || action == Some("logout") {
            return None;
        }
        let target = self.redirects.pick_login_target(request);
        Some(self.start_login(&target))
    }

    /// Hook for unauthenticated page views. With auto-SSO on, returns the
    /// authorize redirect that brings the user back to `current_path`.
    ///
    /// A pending flow notice suppresses auto-SSO so a failure cannot loop.
    #[must_use]
    pub fn on_unauthenticated_request(
        &self,
        current_path: &str,
        notice: Option<FlowNotice>,
    ) -> Option<String> {
        if !self.config.is_active() || !self.config.auto_sso() || notice.is_some() {
            return None;
        }
        let target = self
            .redirects
            .same_origin_target(current_path)
            .unwrap_or_else(|| self.redirects.site().home_url());
        Some(self.start_login(&target))
    }

    /// Handles a hit on the callback entry point.
    ///
    /// # Errors
    ///
    /// Returns the `AuthFlowError` that ended the flow. No cookie or session
    /// exists when an error is returned.
    pub async fn handle_callback(
        &self,
        params: CallbackParams,
    ) -> Result<CallbackOutcome, AuthFlowError> {
        let span = info_span!("casdoor_callback", flow_id = %FlowId::new());

        async move {
            let result = self.run_callback(params).await;
            match &result {
                Ok(outcome) => info!(state = %outcome.state(), "Callback handled"),
                Err(e) => warn!(
                    state = %e.terminal_state(),
                    status = e.status_code(),
                    error = %e,
                    "Login flow ended"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_callback(&self, params: CallbackParams) -> Result<CallbackOutcome, AuthFlowError> {
        let default_target = self.requested_target(&params);
        let state = params
            .state
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
            let hint = state
                .and_then(|state| self.redirects.same_origin_target(state))
                .unwrap_or(default_target);
            return Ok(CallbackOutcome::AwaitingCode {
                location: self.start_login(&hint),
            });
        };

        // An invalid state is ignored, not fatal.
        let target = match state {
            Some(state) => match self.redirects.same_origin_target(state) {
                Some(target) => target,
                None => {
                    debug!(state = %state, "Ignoring off-site state");
                    default_target
                }
            },
            None => default_target,
        };

        debug!(state = %FlowState::Exchanging, "Exchanging authorization code");
        let access_token = self.tokens.exchange(code).await?.into_access_token()?;
        let claims = self.identities.decode(&access_token)?;

        debug!(state = %FlowState::Resolving, subject = %claims.subject(), "Resolving local account");
        let resolution = self.resolver.resolve(&claims, self.config.login_only()).await?;
        let created = resolution.was_created();
        let account = resolution.into_account();
        let session = self.sessions.establish(&account, created).await?;

        let location = if self.config.redirect_to_dashboard() {
            self.redirects.site().dashboard_url()
        } else {
            target
        };

        Ok(CallbackOutcome::Authenticated(Box::new(Authenticated {
            access_token_cookie: self.sessions.access_token_cookie(&access_token),
            session_cookie: self.sessions.host_session_cookie(&session),
            location: self.redirects.safe_redirect(&location),
            account,
            created,
            session,
        })))
    }

    /// Validated `redirect_to` (or legacy `redirect_uri`) parameter, else home.
    fn requested_target(&self, params: &CallbackParams) -> String {
        let home = self.redirects.site().home_url();
        let requested = params
            .redirect_to
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| {
                params
                    .redirect_uri
                    .as_deref()
                    .filter(|v| !v.trim().is_empty())
            });
        requested
            .and_then(|candidate| self.redirects.same_origin_target(candidate))
            .unwrap_or(home)
    }

    /// Logs the user out locally and, when possible, at Casdoor.
    pub async fn logout(&self, request: LogoutRequest) -> LogoutOutcome {
        self.sessions.logout(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountStore, NewAccount, Role};
    use crate::claims::IdentityClaims;
    use crate::config::HostSite;
    use crate::memory::{MemoryAccountStore, MemorySessionStore};
    use crate::token::TokenResponse;
    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Token endpoint stand-in returning a fixed body.
    struct StaticTokens {
        body: String,
        calls: AtomicUsize,
    }

    impl StaticTokens {
        fn new(body: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TokenExchange for StaticTokens {
        async fn exchange(&self, _code: &str) -> Result<TokenResponse, AuthFlowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenResponse::from_body(&self.body))
        }
    }

    struct Harness {
        controller: AuthFlowController,
        accounts: Arc<MemoryAccountStore>,
        sessions: Arc<MemorySessionStore>,
    }

    fn harness(
        tokens: Arc<dyn TokenExchange>,
        configure: impl FnOnce(crate::config::ProviderConfigBuilder) -> crate::config::ProviderConfigBuilder,
    ) -> Harness {
        let site = HostSite::new("https://blog.example.com").expect("valid site");
        let config = Arc::new(
            configure(ProviderConfig::builder(
                "client",
                "secret",
                "https://door.example.com",
            ))
            .build()
            .expect("valid config"),
        );
        let redirects = RedirectValidator::for_provider(site, &config);
        let accounts = Arc::new(MemoryAccountStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let controller = AuthFlowController::new(
            config.clone(),
            redirects.clone(),
            tokens,
            AccountResolver::new(accounts.clone()),
            SessionManager::new(sessions.clone(), redirects, config),
        );
        Harness {
            controller,
            accounts,
            sessions,
        }
    }

    fn jwt(payload: serde_json::Value) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    fn token_body(payload: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "access_token": jwt(payload) })
    }

    fn query_param(location: &str, name: &str) -> Option<String> {
        Url::parse(location)
            .ok()?
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    fn callback(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..CallbackParams::default()
        }
    }

    #[test]
    fn authorize_url_carries_request_parameters() {
        let h = harness(StaticTokens::new(serde_json::json!({})), |b| b);

        let location = h.controller.start_login("/after");

        let url = Url::parse(&location).expect("absolute");
        assert_eq!(url.host_str(), Some("door.example.com"));
        assert_eq!(url.path(), "/login/oauth/authorize");
        assert_eq!(query_param(&location, "response_type").as_deref(), Some("code"));
        assert_eq!(query_param(&location, "client_id").as_deref(), Some("client"));
        assert_eq!(
            query_param(&location, "redirect_uri").as_deref(),
            Some("https://blog.example.com/?auth=casdoor")
        );
        assert_eq!(query_param(&location, "state").as_deref(), Some("/after"));
    }

    #[tokio::test]
    async fn callback_without_code_matches_start_login() {
        let h = harness(StaticTokens::new(serde_json::json!({})), |b| b);

        let outcome = h
            .controller
            .handle_callback(callback(None, Some("/foo")))
            .await
            .expect("outcome");

        assert_eq!(outcome.state(), FlowState::AwaitingCode);
        assert_eq!(outcome.location(), h.controller.start_login("/foo"));
    }

    #[tokio::test]
    async fn callback_without_code_drops_off_site_state() {
        let h = harness(StaticTokens::new(serde_json::json!({})), |b| b);

        let outcome = h
            .controller
            .handle_callback(callback(None, Some("https://evil.example/")))
            .await
            .expect("outcome");

        assert_eq!(
            query_param(outcome.location(), "state").as_deref(),
            Some("https://blog.example.com/")
        );
    }

    #[tokio::test]
    async fn state_round_trips_to_final_redirect() {
        let tokens = StaticTokens::new(token_body(serde_json::json!({ "name": "alice" })));
        let h = harness(tokens, |b| b);

        let authorize = h.controller.start_login("/members/area?tab=2");
        let state = query_param(&authorize, "state").expect("state");
        let outcome = h
            .controller
            .handle_callback(callback(Some("code"), Some(&state)))
            .await
            .expect("outcome");

        assert_eq!(outcome.location(), "/members/area?tab=2");
    }

    #[tokio::test]
    async fn successful_callback_provisions_and_signs_in() {
        let tokens = StaticTokens::new(token_body(serde_json::json!({
            "name": "alice",
            "email": "alice@example.com",
            "isGlobalAdmin": true
        })));
        let h = harness(tokens, |b| b);
        let mut events = h.controller.sessions().subscribe();

        let outcome = h
            .controller
            .handle_callback(callback(Some("code"), None))
            .await
            .expect("outcome");

        let CallbackOutcome::Authenticated(done) = outcome else {
            panic!("expected authenticated outcome");
        };
        assert!(done.created);
        assert_eq!(done.account.username(), "alice");
        assert_eq!(done.account.display_name(), "alice");
        assert!(done.account.has_role(Role::Administrator));
        assert_eq!(done.location, "https://blog.example.com/");
        assert_eq!(done.access_token_cookie.name, "access_token_cookie");
        assert!(!done.access_token_cookie.is_removal());
        assert_eq!(h.sessions.len().await, 1);
        assert_eq!(events.recv().await.expect("event").username, "alice");
    }

    #[tokio::test]
    async fn off_site_state_falls_back_without_failing() {
        let tokens = StaticTokens::new(token_body(serde_json::json!({ "name": "alice" })));
        let h = harness(tokens, |b| b);

        let outcome = h
            .controller
            .handle_callback(CallbackParams {
                code: Some("code".to_string()),
                state: Some("https://evil.example/phish".to_string()),
                redirect_to: Some("/wanted".to_string()),
                redirect_uri: None,
            })
            .await
            .expect("outcome");

        assert_eq!(outcome.location(), "/wanted");
    }

    #[tokio::test]
    async fn state_that_sanitizes_off_site_is_ignored() {
        let tokens = StaticTokens::new(token_body(serde_json::json!({ "name": "alice" })));
        let h = harness(tokens, |b| b.auto_sso(true));

        let outcome = h
            .controller
            .handle_callback(CallbackParams {
                code: Some("code".to_string()),
                state: Some("/<//evil.example/phish".to_string()),
                redirect_to: Some("/\"//evil.example/x".to_string()),
                redirect_uri: None,
            })
            .await
            .expect("outcome");
        assert_eq!(outcome.location(), "https://blog.example.com/");

        let location = h
            .controller
            .on_unauthenticated_request("/<//evil.example/phish", None)
            .expect("redirect");
        assert_eq!(
            query_param(&location, "state").as_deref(),
            Some("https://blog.example.com/")
        );
    }

    #[tokio::test]
    async fn legacy_redirect_uri_is_honoured() {
        let tokens = StaticTokens::new(token_body(serde_json::json!({ "name": "alice" })));
        let h = harness(tokens, |b| b);

        let outcome = h
            .controller
            .handle_callback(CallbackParams {
                code: Some("code".to_string()),
                redirect_uri: Some("/legacy".to_string()),
                ..CallbackParams::default()
            })
            .await
            .expect("outcome");

        assert_eq!(outcome.location(), "/legacy");
    }

    #[tokio::test]
    async fn dashboard_policy_overrides_state() {
        let tokens = StaticTokens::new(token_body(serde_json::json!({ "name": "alice" })));
        let h = harness(tokens, |b| b.redirect_to_dashboard(true));

        let outcome = h
            .controller
            .handle_callback(callback(Some("code"), Some("/elsewhere")))
            .await
            .expect("outcome");

        assert_eq!(outcome.location(), "https://blog.example.com/dashboard");
    }

    #[tokio::test]
    async fn provider_error_creates_nothing() {
        let tokens = StaticTokens::new(serde_json::json!({ "error": "invalid_grant" }));
        let h = harness(tokens, |b| b);

        let err = h
            .controller
            .handle_callback(callback(Some("code"), None))
            .await
            .expect_err("provider error");

        assert_eq!(err.status_code(), 400);
        assert_eq!(err.terminal_state(), FlowState::Failed);
        assert_eq!(h.accounts.len().await, 0);
        assert_eq!(h.sessions.len().await, 0);
    }

    #[tokio::test]
    async fn two_segment_token_is_malformed() {
        let tokens = StaticTokens::new(serde_json::json!({ "access_token": "header.payload" }));
        let h = harness(tokens, |b| b);

        let err = h
            .controller
            .handle_callback(callback(Some("code"), None))
            .await
            .expect_err("malformed");

        assert!(matches!(err, AuthFlowError::MalformedToken { .. }));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn login_only_denies_without_session() {
        let tokens = StaticTokens::new(token_body(serde_json::json!({
            "name": "mallory",
            "email": "mallory@example.com"
        })));
        let h = harness(tokens, |b| b.login_only(true));

        let err = h
            .controller
            .handle_callback(callback(Some("code"), None))
            .await
            .expect_err("denied");

        assert_eq!(err.status_code(), 403);
        assert_eq!(err.terminal_state(), FlowState::Denied);
        assert_eq!(h.accounts.len().await, 0);
        assert_eq!(h.sessions.len().await, 0);
    }

    #[tokio::test]
    async fn login_only_signs_in_linked_account() {
        let tokens = StaticTokens::new(token_body(serde_json::json!({
            "name": "alice-casdoor",
            "email": "alice@example.com"
        })));
        let h = harness(tokens, |b| b.login_only(true));
        let existing = h
            .accounts
            .create(NewAccount::from_claims(
                &IdentityClaims::new("alice").with_email("alice@example.com"),
            ))
            .await
            .expect("seed");

        let outcome = h
            .controller
            .handle_callback(callback(Some("code"), None))
            .await
            .expect("outcome");

        let CallbackOutcome::Authenticated(done) = outcome else {
            panic!("expected authenticated outcome");
        };
        assert!(!done.created);
        assert_eq!(done.account.id(), existing.id());
    }

    #[tokio::test]
    async fn login_entry_respects_action_and_activation() {
        let h = harness(StaticTokens::new(serde_json::json!({})), |b| b);
        let request = LoginRequest::new(Some("/next".to_string()), None);

        assert!(h.controller.on_login_entry(Some("logout"), &request).is_none());
        let location = h
            .controller
            .on_login_entry(None, &request)
            .expect("redirect");
        assert_eq!(query_param(&location, "state").as_deref(), Some("/next"));

        let inactive = harness(StaticTokens::new(serde_json::json!({})), |b| {
            b.active(false)
        });
        assert!(inactive.controller.on_login_entry(None, &request).is_none());
    }

    #[test]
    fn auto_sso_only_when_enabled_and_no_notice() {
        let off = harness(StaticTokens::new(serde_json::json!({})), |b| b);
        assert!(off.controller.on_unauthenticated_request("/post/1", None).is_none());

        let on = harness(StaticTokens::new(serde_json::json!({})), |b| b.auto_sso(true));
        let location = on
            .controller
            .on_unauthenticated_request("/post/1", None)
            .expect("redirect");
        assert_eq!(query_param(&location, "state").as_deref(), Some("/post/1"));
        assert!(
            on.controller
                .on_unauthenticated_request("/", Some(FlowNotice::SsoFailed))
                .is_none()
        );
    }

    #[test]
    fn notice_codes_round_trip() {
        for notice in [
            FlowNotice::LoginOnly,
            FlowNotice::SsoFailed,
            FlowNotice::IdNotAllowed,
        ] {
            assert_eq!(FlowNotice::from_code(notice.code()), Some(notice));
        }
        assert_eq!(FlowNotice::from_code("other"), None);
    }

    #[tokio::test]
    async fn token_endpoint_not_called_without_code() {
        let tokens = StaticTokens::new(serde_json::json!({}));
        let h = harness(tokens.clone(), |b| b);

        h.controller
            .handle_callback(callback(Some(""), Some("/x")))
            .await
            .expect("outcome");

        assert_eq!(tokens.calls.load(Ordering::SeqCst), 0);
    }
}
