//! Redirect-target validation.
//!
//! Every destination the flow redirects a browser to passes through
//! `RedirectValidator`. Invalid targets are never errors: they are replaced
//! by a safe default so an attacker-supplied value can only be ignored.

use crate::config::{HostSite, ProviderConfig};

/// Query keys that carry a nested redirect target, in precedence order.
pub const REDIRECT_CHAIN_KEYS: [&str; 4] = ["redirect_to", "redirect", "wc-redirect", "return_to"];

/// Maximum number of nested redirect parameters unwrapped by `resolve_chain`.
pub const MAX_CHAIN_HOPS: usize = 3;

/// Redirect-relevant parts of an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginRequest {
    /// The `redirect_to` request parameter.
    pub redirect_to: Option<String>,
    /// The `Referer` header.
    pub referer: Option<String>,
}

impl LoginRequest {
    #[must_use]
    pub fn new(redirect_to: Option<String>, referer: Option<String>) -> Self {
        Self {
            redirect_to,
            referer,
        }
    }
}

/// Decides which redirect destinations are safe.
#[derive(Debug, Clone)]
pub struct RedirectValidator {
    site: HostSite,
    allowed_hosts: Vec<String>,
}

impl RedirectValidator {
    /// Creates a validator that only allows the site's canonical host.
    #[must_use]
    pub fn new(site: HostSite) -> Self {
        let allowed_hosts = vec![site.canonical_host().to_ascii_lowercase()];
        Self {
            site,
            allowed_hosts,
        }
    }

    /// Creates a validator that also allows the identity provider's host
    /// while the integration is active.
    #[must_use]
    pub fn for_provider(site: HostSite, provider: &ProviderConfig) -> Self {
        let validator = Self::new(site);
        if provider.is_active() {
            validator.allow_host(provider.backend_host())
        } else {
            validator
        }
    }

    /// Adds a host to the safe-redirect allow-list.
    #[must_use]
    pub fn allow_host(mut self, host: &str) -> Self {
        let host = host.to_ascii_lowercase();
        if !host.is_empty() && !self.allowed_hosts.contains(&host) {
            self.allowed_hosts.push(host);
        }
        self
    }

    #[must_use]
    pub fn site(&self) -> &HostSite {
        &self.site
    }

    #[must_use]
    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    /// True if `url` is relative or points at the canonical host.
    ///
    /// The candidate is resolved against the home URL, so protocol-relative
    /// URLs are judged by their host and non-web schemes are rejected.
    #[must_use]
    pub fn is_same_origin(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }
        match self.site.home().join(url) {
            Ok(resolved) => {
                matches!(resolved.scheme(), "http" | "https")
                    && resolved
                        .host_str()
                        .is_some_and(|host| host.eq_ignore_ascii_case(self.site.canonical_host()))
            }
            Err(_) => false,
        }
    }

    /// Unwraps nested redirect parameters, at most `MAX_CHAIN_HOPS` deep.
    ///
    /// Stops at the first hop that is absent, unparsable or off-site and
    /// returns the last accepted URL.
    #[must_use]
    pub fn resolve_chain(&self, url: &str) -> String {
        let mut current = url.to_string();

        for _ in 0..MAX_CHAIN_HOPS {
            if current.is_empty() {
                break;
            }
            let Some(candidate) = self.nested_target(&current) else {
                break;
            };
            if !self.is_same_origin(&candidate) {
                break;
            }
            current = candidate;
        }

        current
    }

    fn nested_target(&self, url: &str) -> Option<String> {
        let parsed = self.site.home().join(url).ok()?;
        parsed.query()?;
        REDIRECT_CHAIN_KEYS.iter().find_map(|key| {
            parsed
                .query_pairs()
                .find(|(name, value)| name == key && !value.is_empty())
                .map(|(_, value)| value.into_owned())
        })
    }

    /// Picks where to send the browser after a login started from `request`.
    ///
    /// Precedence: the chain-resolved `redirect_to` parameter, then a
    /// same-origin referer that is not itself a login or callback URL, then
    /// the dashboard (or home if the dashboard is off-site). The result is
    /// always sanitized.
    #[must_use]
    pub fn pick_login_target(&self, request: &LoginRequest) -> String {
        if let Some(redirect_to) = non_empty(request.redirect_to.as_deref())
            && let Some(target) = self.same_origin_target(&self.resolve_chain(redirect_to))
        {
            return target;
        }

        if let Some(referer) = non_empty(request.referer.as_deref())
            && let Some(target) = self.same_origin_target(referer)
            && !self.is_login_or_callback(&target)
        {
            return target;
        }

        self.default_target()
    }

    /// Sanitizes `url` and returns it if the sanitized form is same-origin.
    ///
    /// The origin check runs on the sanitized string, since dropping
    /// characters can turn a path into a scheme-relative URL.
    #[must_use]
    pub fn same_origin_target(&self, url: &str) -> Option<String> {
        let target = sanitize_redirect(url.trim());
        self.is_same_origin(&target).then_some(target)
    }

    /// Dashboard URL, or the home URL if the dashboard is off-site.
    #[must_use]
    pub fn default_target(&self) -> String {
        self.same_origin_target(&self.site.dashboard_url())
            .unwrap_or_else(|| sanitize_redirect(&self.site.home_url()))
    }

    fn is_login_or_callback(&self, url: &str) -> bool {
        let Ok(parsed) = self.site.home().join(url) else {
            return true;
        };
        let path = parsed.path().trim_end_matches('/');
        let login = self.site.mounted_path(self.site.login_path());
        let callback = self.site.mounted_path("/auth/casdoor");
        if path == login.trim_end_matches('/') || path == callback {
            return true;
        }
        parsed
            .query_pairs()
            .any(|(key, value)| key == "auth" && value == "casdoor")
    }

    /// Returns `candidate` if its host is allow-listed, otherwise `fallback`.
    ///
    /// Relative candidates are allowed. The returned value is sanitized.
    #[must_use]
    pub fn validate(&self, candidate: &str, fallback: &str) -> String {
        let sanitized = sanitize_redirect(candidate.trim());
        if !sanitized.is_empty() && self.is_allowed(&sanitized) {
            sanitized
        } else {
            sanitize_redirect(fallback)
        }
    }

    /// Safe-redirect primitive: destinations outside the allow-list are
    /// replaced by the dashboard URL.
    #[must_use]
    pub fn safe_redirect(&self, location: &str) -> String {
        self.validate(location, &self.site.dashboard_url())
    }

    fn is_allowed(&self, url: &str) -> bool {
        let Ok(resolved) = self.site.home().join(url) else {
            return false;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            return false;
        }
        resolved.host_str().is_some_and(|host| {
            self.allowed_hosts
                .iter()
                .any(|allowed| host.eq_ignore_ascii_case(allowed))
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Strips characters that could inject headers from a redirect location.
///
/// Spaces and non-ASCII bytes are percent-encoded, anything outside the URL
/// character set is dropped and encoded CR/LF sequences are removed until
/// none remain.
#[must_use]
pub fn sanitize_redirect(location: &str) -> String {
    let mut encoded = String::with_capacity(location.len());
    for ch in location.chars() {
        if ch == ' ' {
            encoded.push_str("%20");
        } else if ch.is_ascii() {
            if is_redirect_char(ch) {
                encoded.push(ch);
            }
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        }
    }

    strip_encoded_newlines(encoded)
}

fn is_redirect_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || "-~+_.?#=&;,/:%!*[]()@".contains(ch)
}

fn strip_encoded_newlines(mut location: String) -> String {
    loop {
        let lower = location.to_ascii_lowercase();
        let Some(pos) = lower.find("%0d").or_else(|| lower.find("%0a")) else {
            return location;
        };
        location.replace_range(pos..pos + 3, "");
    }
}
