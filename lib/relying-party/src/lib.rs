//! Casdoor relying-party single sign-on.
//!
//! This crate implements the browser login flow against a Casdoor identity
//! provider, independent of any web framework:
//!
//! - [`RedirectValidator`]: same-origin checks and redirect-chain unwrapping
//! - [`TokenClient`]: the authorization-code exchange
//! - [`IdentityExtractor`]: access-token claim decoding
//! - [`AccountResolver`]: mapping identities onto host accounts
//! - [`SessionManager`]: host sessions, the access-token cookie and logout
//! - [`AuthFlowController`]: the state machine tying them together
//!
//! Hosts plug in their storage through [`AccountStore`] and [`SessionStore`].

pub mod account;
pub mod claims;
pub mod config;
pub mod error;
pub mod flow;
pub mod memory;
pub mod redirect;
pub mod session;
pub mod token;

pub use account::{
    AccountResolver, AccountStore, GeneratedPassword, LocalAccount, NewAccount, Resolution, Role,
};
pub use claims::{IdentityClaims, IdentityExtractor};
pub use config::{HostSite, ProviderConfig, ProviderConfigBuilder, ProviderSettings, SiteSettings};
pub use error::{AuthFlowError, ConfigError};
pub use flow::{
    AuthFlowController, Authenticated, AuthorizationRequest, CallbackOutcome, CallbackParams,
    FlowNotice, FlowState,
};
pub use memory::{MemoryAccountStore, MemorySessionStore};
pub use redirect::{LoginRequest, RedirectValidator, sanitize_redirect};
pub use session::{
    ACCESS_TOKEN_COOKIE, CookieDirective, HOST_SESSION_COOKIE, HostSession, LoginEvent,
    LogoutOutcome, LogoutRequest, SameSitePolicy, SessionManager, SessionStore,
};
pub use token::{TokenClient, TokenExchange, TokenResponse};
