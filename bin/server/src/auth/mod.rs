//! Authentication module for the host server.
//!
//! This module provides:
//! - The Casdoor callback, login entry, logout and signup routes
//! - Postgres-backed account and session stores
//! - Authentication extractors and the auto-SSO layer for page routes
//!
//! The login flow itself lives in `casdoor-sso-relying-party`; handlers
//! here only translate HTTP requests into flow calls and flow results into
//! responses and cookies.

pub mod cookies;
pub mod db;
pub mod middleware;
pub mod routes;

use casdoor_sso_relying_party::{AccountStore, AuthFlowController};
use std::sync::Arc;

pub use middleware::{AuthRejection, CurrentUser, OptionalAuth, RequireAuth, auto_sso_layer};
pub use routes::{casdoor_callback, dashboard, home, login_entry, logout, signup};

/// Shared application state.
pub struct AppState {
    /// The login flow controller.
    pub controller: AuthFlowController,
    /// Account store used to load the signed-in account.
    pub accounts: Arc<dyn AccountStore>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(controller: AuthFlowController, accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            controller,
            accounts,
        }
    }
}
