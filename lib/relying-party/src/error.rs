//! Error types for the relying-party crate.
//!
//! - `AuthFlowError`: fatal outcomes of a login flow, each mapped to an
//!   HTTP status and a message that is safe to show the user
//! - `ConfigError`: configuration rejected at load time
//!
//! Redirect-target validation never produces an error; bad targets are
//! replaced by a safe default instead.

use crate::flow::FlowState;
use std::fmt;

/// Fatal errors that terminate a login flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFlowError {
    /// The token endpoint could not be reached or timed out.
    Transport { reason: String },
    /// The identity provider answered with an OAuth error.
    Provider {
        error: String,
        description: Option<String>,
    },
    /// The token response carried no access token.
    MissingAccessToken,
    /// The access token could not be decoded into identity claims.
    MalformedToken { reason: String },
    /// No local account matches and account creation is disabled.
    AccessDenied { subject: String },
    /// The account store failed while looking up an account.
    AccountLookup { reason: String },
    /// The account store rejected a new account.
    AccountCreation { username: String, reason: String },
    /// The host session could not be established.
    Session { reason: String },
}

impl AuthFlowError {
    /// HTTP status code for the response that ends the flow.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Provider { .. } | Self::MissingAccessToken | Self::MalformedToken { .. } => 400,
            Self::AccessDenied { .. } => 403,
            Self::Transport { .. }
            | Self::AccountLookup { .. }
            | Self::AccountCreation { .. }
            | Self::Session { .. } => 500,
        }
    }

    /// Short page title for the error response.
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::Provider { .. } => "Casdoor Token Error",
            Self::AccessDenied { .. } => "Access Denied",
            Self::AccountCreation { .. } => "User Creation Error",
            _ => "Casdoor Authentication Error",
        }
    }

    /// Message shown to the user. Never contains secrets or store internals.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { .. } => {
                "Could not reach the identity provider. Please try again later.".to_string()
            }
            Self::Provider { error, description } => description
                .as_deref()
                .filter(|d| !d.is_empty())
                .unwrap_or(error)
                .to_string(),
            Self::MissingAccessToken => "Missing access token in Casdoor response.".to_string(),
            Self::MalformedToken { .. } => "Invalid token received from Casdoor.".to_string(),
            Self::AccessDenied { .. } => {
                "Your Casdoor account is not linked to a local user. Please contact the administrator."
                    .to_string()
            }
            Self::AccountLookup { .. } | Self::Session { .. } => {
                "Unable to sign you in right now. Please try again later.".to_string()
            }
            Self::AccountCreation { .. } => {
                "Unable to create a local account for this Casdoor user.".to_string()
            }
        }
    }

    /// The terminal state the flow ends in.
    #[must_use]
    pub fn terminal_state(&self) -> FlowState {
        match self {
            Self::AccessDenied { .. } => FlowState::Denied,
            _ => FlowState::Failed,
        }
    }
}

impl fmt::Display for AuthFlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { reason } => write!(f, "token exchange transport error: {reason}"),
            Self::Provider { error, description } => match description {
                Some(description) => write!(f, "provider error '{error}': {description}"),
                None => write!(f, "provider error '{error}'"),
            },
            Self::MissingAccessToken => write!(f, "token response has no access token"),
            Self::MalformedToken { reason } => write!(f, "malformed access token: {reason}"),
            Self::AccessDenied { subject } => {
                write!(f, "no local account for '{subject}' and login-only is enabled")
            }
            Self::AccountLookup { reason } => write!(f, "account lookup failed: {reason}"),
            Self::AccountCreation { username, reason } => {
                write!(f, "failed to create account '{username}': {reason}")
            }
            Self::Session { reason } => write!(f, "failed to establish session: {reason}"),
        }
    }
}

impl std::error::Error for AuthFlowError {}

/// Configuration rejected at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A URL setting is malformed or uses an unsupported scheme.
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
    /// A required setting is empty.
    MissingField { field: &'static str },
    /// The outbound HTTP client could not be built.
    HttpClient { details: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl {
                field,
                value,
                reason,
            } => write!(f, "invalid {field} '{value}': {reason}"),
            Self::MissingField { field } => write!(f, "missing required setting: {field}"),
            Self::HttpClient { details } => write!(f, "failed to build HTTP client: {details}"),
        }
    }
}

impl std::error::Error for ConfigError {}
