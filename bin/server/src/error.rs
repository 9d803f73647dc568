//! Error types for the host server.
//!
//! Login-flow failures arrive as [`AuthFlowError`] and are rendered by
//! [`FlowErrorResponse`]. Startup failures are reported through rootcause
//! with a [`StartupError`] context.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use casdoor_sso_relying_party::AuthFlowError;
use std::fmt;

/// Errors that abort server startup.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded or validated.
    Config { details: String },
    /// The database could not be reached.
    Database { details: String },
    /// Schema migrations failed.
    Migration { details: String },
    /// The outbound token client could not be built.
    TokenClient { details: String },
    /// The listener could not bind.
    Bind { addr: String, details: String },
    /// The server stopped with an error.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "failed to load configuration: {details}"),
            Self::Database { details } => write!(f, "failed to connect to database: {details}"),
            Self::Migration { details } => write!(f, "failed to run migrations: {details}"),
            Self::TokenClient { details } => {
                write!(f, "failed to build token client: {details}")
            }
            Self::Bind { addr, details } => write!(f, "failed to bind {addr}: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// Renders a failed login flow as a plain-text error page.
///
/// The status code and message come from the flow error; internal details
/// only reach the log.
#[derive(Debug)]
pub struct FlowErrorResponse(pub AuthFlowError);

impl From<AuthFlowError> for FlowErrorResponse {
    fn from(error: AuthFlowError) -> Self {
        Self(error)
    }
}

impl IntoResponse for FlowErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Login flow failed");
        }
        let body = format!("{}\n\n{}", self.0.title(), self.0.user_message());
        (status, body).into_response()
    }
}
