//! Provider and host-site configuration.
//!
//! Both types are validated when they are deserialized, so a malformed
//! backend or home URL fails at startup instead of on the first login.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Organization used when none is configured.
pub const DEFAULT_ORGANIZATION: &str = "built-in";

/// Application used when none is configured.
pub const DEFAULT_APPLICATION: &str = "app-built-in";

/// Query string of the callback entry point registered with Casdoor.
pub const CALLBACK_QUERY: &str = "auth=casdoor";

/// Raw provider settings as persisted by the host.
///
/// Fields with defaults can be omitted when loading from the environment.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// OAuth2 client ID of the Casdoor application.
    #[serde(default)]
    pub client_id: String,
    /// OAuth2 client secret.
    #[serde(default)]
    pub client_secret: String,
    /// Casdoor backend base URL (e.g. "https://door.example.com").
    pub backend: String,
    /// Casdoor organization name.
    #[serde(default = "default_organization")]
    pub organization: String,
    /// Casdoor application name, used for signup links.
    #[serde(default = "default_application")]
    pub application: String,
    /// Whether the integration handles logins at all.
    #[serde(default)]
    pub active: bool,
    /// Refuse to create local accounts for unknown identities.
    #[serde(default)]
    pub login_only: bool,
    /// Send every unauthenticated page view through Casdoor.
    #[serde(default)]
    pub auto_sso: bool,
    /// Always land on the dashboard after login.
    #[serde(default)]
    pub redirect_to_dashboard: bool,
}

fn default_organization() -> String {
    DEFAULT_ORGANIZATION.to_string()
}

fn default_application() -> String {
    DEFAULT_APPLICATION.to_string()
}

/// Validated Casdoor provider configuration.
///
/// Immutable once loaded. The backend URL is normalized without a trailing
/// slash so endpoint paths can be appended directly.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "ProviderSettings", into = "ProviderSettings")]
pub struct ProviderConfig {
    client_id: String,
    client_secret: String,
    backend: String,
    backend_host: String,
    organization: String,
    application: String,
    active: bool,
    login_only: bool,
    auto_sso: bool,
    redirect_to_dashboard: bool,
}

impl ProviderConfig {
    /// Creates a configuration builder with the required fields.
    #[must_use]
    pub fn builder(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        backend: impl Into<String>,
    ) -> ProviderConfigBuilder {
        ProviderConfigBuilder::new(client_id.into(), client_secret.into(), backend.into())
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the normalized backend base URL.
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Returns the lower-cased host of the backend URL.
    #[must_use]
    pub fn backend_host(&self) -> &str {
        &self.backend_host
    }

    /// Returns the Casdoor organization name.
    #[must_use]
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Returns the Casdoor application name.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn login_only(&self) -> bool {
        self.login_only
    }

    #[must_use]
    pub fn auto_sso(&self) -> bool {
        self.auto_sso
    }

    #[must_use]
    pub fn redirect_to_dashboard(&self) -> bool {
        self.redirect_to_dashboard
    }

    /// Authorization endpoint the browser is sent to.
    #[must_use]
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/login/oauth/authorize", self.backend)
    }

    /// Back-channel token endpoint.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/api/login/oauth/access_token", self.backend)
    }

    /// RP-initiated logout endpoint.
    #[must_use]
    pub fn logout_endpoint(&self) -> String {
        format!("{}/api/logout", self.backend)
    }

    /// Signup page for the configured application.
    #[must_use]
    pub fn signup_url(&self) -> String {
        let application = if self.application.is_empty() {
            DEFAULT_APPLICATION
        } else {
            &self.application
        };
        let encoded: String = url::form_urlencoded::byte_serialize(application.as_bytes()).collect();
        format!("{}/signup/{encoded}", self.backend)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("backend", &self.backend)
            .field("organization", &self.organization)
            .field("application", &self.application)
            .field("active", &self.active)
            .field("login_only", &self.login_only)
            .field("auto_sso", &self.auto_sso)
            .field("redirect_to_dashboard", &self.redirect_to_dashboard)
            .finish()
    }
}

impl TryFrom<ProviderSettings> for ProviderConfig {
    type Error = ConfigError;

    fn try_from(settings: ProviderSettings) -> Result<Self, Self::Error> {
        let raw_backend = settings.backend.trim();
        let backend = raw_backend.trim_end_matches('/');
        if backend.is_empty() {
            return Err(ConfigError::MissingField { field: "backend" });
        }

        let parsed = Url::parse(backend).map_err(|e| ConfigError::InvalidUrl {
            field: "backend",
            value: raw_backend.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                field: "backend",
                value: raw_backend.to_string(),
                reason: "scheme must be http or https".to_string(),
            });
        }
        let backend_host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidUrl {
                field: "backend",
                value: raw_backend.to_string(),
                reason: "missing host".to_string(),
            })?
            .to_ascii_lowercase();

        let client_id = settings.client_id.trim().to_string();
        if settings.active && client_id.is_empty() {
            return Err(ConfigError::MissingField { field: "client_id" });
        }

        Ok(Self {
            client_id,
            client_secret: settings.client_secret.trim().to_string(),
            backend: backend.to_string(),
            backend_host,
            organization: settings.organization.trim().to_string(),
            application: settings.application.trim().to_string(),
            active: settings.active,
            login_only: settings.login_only,
            auto_sso: settings.auto_sso,
            redirect_to_dashboard: settings.redirect_to_dashboard,
        })
    }
}

impl From<ProviderConfig> for ProviderSettings {
    fn from(config: ProviderConfig) -> Self {
        Self {
            client_id: config.client_id,
            client_secret: config.client_secret,
            backend: config.backend,
            organization: config.organization,
            application: config.application,
            active: config.active,
            login_only: config.login_only,
            auto_sso: config.auto_sso,
            redirect_to_dashboard: config.redirect_to_dashboard,
        }
    }
}

/// Builder for `ProviderConfig`.
pub struct ProviderConfigBuilder {
    settings: ProviderSettings,
}

impl ProviderConfigBuilder {
    fn new(client_id: String, client_secret: String, backend: String) -> Self {
        Self {
            settings: ProviderSettings {
                client_id,
                client_secret,
                backend,
                organization: default_organization(),
                application: default_application(),
                active: true,
                login_only: false,
                auto_sso: false,
                redirect_to_dashboard: false,
            },
        }
    }

    #[must_use]
    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.settings.organization = organization.into();
        self
    }

    #[must_use]
    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.settings.application = application.into();
        self
    }

    #[must_use]
    pub fn active(mut self, active: bool) -> Self {
        self.settings.active = active;
        self
    }

    #[must_use]
    pub fn login_only(mut self, login_only: bool) -> Self {
        self.settings.login_only = login_only;
        self
    }

    #[must_use]
    pub fn auto_sso(mut self, auto_sso: bool) -> Self {
        self.settings.auto_sso = auto_sso;
        self
    }

    #[must_use]
    pub fn redirect_to_dashboard(mut self, redirect_to_dashboard: bool) -> Self {
        self.settings.redirect_to_dashboard = redirect_to_dashboard;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend URL is malformed, or if the
    /// integration is active without a client ID.
    pub fn build(self) -> Result<ProviderConfig, ConfigError> {
        ProviderConfig::try_from(self.settings)
    }
}

/// Raw host-site settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSettings {
    /// Canonical home URL of the host application.
    pub home_url: String,
    /// Path of the authenticated landing page.
    #[serde(default = "default_dashboard_path")]
    pub dashboard_path: String,
    /// Path of the host's native login entry point.
    #[serde(default = "default_login_path")]
    pub login_path: String,
}

fn default_dashboard_path() -> String {
    "/dashboard".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

/// The host application's canonical URLs.
///
/// Every redirect decision is made relative to `home`, and the canonical
/// host is the boundary for same-origin checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SiteSettings", into = "SiteSettings")]
pub struct HostSite {
    home: Url,
    dashboard_path: String,
    login_path: String,
}

impl HostSite {
    /// Creates a host site with the default dashboard and login paths.
    ///
    /// # Errors
    ///
    /// Returns an error if `home_url` is not an absolute http(s) URL.
    pub fn new(home_url: &str) -> Result<Self, ConfigError> {
        Self::try_from(SiteSettings {
            home_url: home_url.to_string(),
            dashboard_path: default_dashboard_path(),
            login_path: default_login_path(),
        })
    }

    /// Replaces the dashboard path.
    #[must_use]
    pub fn with_dashboard_path(mut self, path: impl Into<String>) -> Self {
        self.dashboard_path = normalize_path(&path.into());
        self
    }

    /// Replaces the login entry path.
    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = normalize_path(&path.into());
        self
    }

    /// Base URL that relative redirect targets are resolved against.
    #[must_use]
    pub fn home(&self) -> &Url {
        &self.home
    }

    /// Home page URL, always ending in `/`.
    #[must_use]
    pub fn home_url(&self) -> String {
        self.home.to_string()
    }

    /// Lower-cased canonical host.
    #[must_use]
    pub fn canonical_host(&self) -> &str {
        // try_from guarantees a host
        self.home.host_str().unwrap_or_default()
    }

    /// True when the site is served over TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.home.scheme() == "https"
    }

    #[must_use]
    pub fn dashboard_path(&self) -> &str {
        &self.dashboard_path
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Absolute URL of the authenticated landing page.
    #[must_use]
    pub fn dashboard_url(&self) -> String {
        self.absolute(&self.mounted_path(&self.dashboard_path))
    }

    /// Absolute URL of the native login entry point.
    #[must_use]
    pub fn login_url(&self) -> String {
        self.absolute(&self.mounted_path(&self.login_path))
    }

    /// Callback URL registered with Casdoor as the `redirect_uri`.
    ///
    /// Keeps the home URL's path, so a site mounted below the root gets its
    /// callback there too.
    #[must_use]
    pub fn callback_url(&self) -> String {
        let mut url = self.home.clone();
        url.set_query(Some(CALLBACK_QUERY));
        url.to_string()
    }

    /// URL path of a site path once the home URL's own path is prefixed.
    ///
    /// `/login` under `https://x.com/blog/` is `/blog/login`.
    #[must_use]
    pub fn mounted_path(&self, path: &str) -> String {
        self.home
            .join(path.trim_start_matches('/'))
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| self.home.path().to_string())
    }

    /// Resolves `target` against the home URL.
    ///
    /// Unresolvable targets yield the home URL.
    #[must_use]
    pub fn absolute(&self, target: &str) -> String {
        self.home
            .join(target)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| self.home_url())
    }
}

impl TryFrom<SiteSettings> for HostSite {
    type Error = ConfigError;

    fn try_from(settings: SiteSettings) -> Result<Self, Self::Error> {
        let raw = settings.home_url.trim();
        let mut home = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
            field: "home_url",
            value: raw.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(home.scheme(), "http" | "https") || home.host_str().is_none() {
            return Err(ConfigError::InvalidUrl {
                field: "home_url",
                value: raw.to_string(),
                reason: "must be an absolute http or https URL".to_string(),
            });
        }
        home.set_query(None);
        home.set_fragment(None);
        if !home.path().ends_with('/') {
            let path = format!("{}/", home.path());
            home.set_path(&path);
        }

        Ok(Self {
            home,
            dashboard_path: normalize_path(&settings.dashboard_path),
            login_path: normalize_path(&settings.login_path),
        })
    }
}

impl From<HostSite> for SiteSettings {
    fn from(site: HostSite) -> Self {
        Self {
            home_url: site.home.to_string(),
            dashboard_path: site.dashboard_path,
            login_path: site.login_path,
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
