//! Host routes for the Casdoor login flow.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, header::REFERER},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use casdoor_sso_relying_party::{
    ACCESS_TOKEN_COOKIE, CallbackOutcome, CallbackParams, FlowNotice, HOST_SESSION_COOKIE,
    LoginRequest, LogoutRequest,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::{AppState, RequireAuth, cookies::to_cookie};
use crate::error::FlowErrorResponse;

/// Query parameters accepted by the callback entry points.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    auth: Option<String>,
    code: Option<String>,
    state: Option<String>,
    redirect_to: Option<String>,
    redirect_uri: Option<String>,
    message: Option<String>,
}

impl CallbackQuery {
    fn is_casdoor_callback(&self) -> bool {
        self.auth.as_deref() == Some("casdoor")
    }

    fn into_params(self) -> CallbackParams {
        CallbackParams {
            code: self.code,
            state: self.state,
            redirect_to: self.redirect_to,
            redirect_uri: self.redirect_uri,
        }
    }
}

/// Query parameters of the login entry point.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    action: Option<String>,
    redirect_to: Option<String>,
}

/// Query parameters of the logout entry point.
#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    redirect_to: Option<String>,
}

/// Site front page. Doubles as the `/?auth=casdoor` callback.
pub async fn home(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if query.is_casdoor_callback() && state.controller.config().is_active() {
        return run_callback(&state, jar, query.into_params()).await;
    }

    let site = state.controller.redirects().site();
    let mut body = format!("Welcome to {}.", site.home_url());
    if let Some(notice) = query.message.as_deref().and_then(FlowNotice::from_code) {
        body.push_str(&format!(
            "\n\n{}\nPlease try again: {}",
            notice.message(),
            site.callback_url()
        ));
    }
    body.into_response()
}

/// Dedicated callback route (`/auth/casdoor`). Sends the browser home while
/// the integration is inactive.
pub async fn casdoor_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if !state.controller.config().is_active() {
        return Redirect::to(&state.controller.redirects().site().home_url()).into_response();
    }
    run_callback(&state, jar, query.into_params()).await
}

async fn run_callback(state: &AppState, jar: CookieJar, params: CallbackParams) -> Response {
    match state.controller.handle_callback(params).await {
        Ok(CallbackOutcome::AwaitingCode { location }) => Redirect::to(&location).into_response(),
        Ok(CallbackOutcome::Authenticated(authenticated)) => {
            let authenticated = *authenticated;
            info!(
                account_id = %authenticated.account.id(),
                created = authenticated.created,
                "Signed in via Casdoor"
            );
            let jar = jar
                .add(to_cookie(authenticated.access_token_cookie))
                .add(to_cookie(authenticated.session_cookie));
            (jar, Redirect::to(&authenticated.location)).into_response()
        }
        Err(e) => FlowErrorResponse(e).into_response(),
    }
}

/// Host login entry point (`/login`).
///
/// Sends the browser to Casdoor unless the integration is off or the
/// request is a logout, which is handled here as well.
pub async fn login_entry(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    if query.action.as_deref() == Some("logout") {
        return run_logout(&state, jar, query.redirect_to).await;
    }

    let referer = headers
        .get(REFERER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let request = LoginRequest::new(query.redirect_to, referer);

    match state
        .controller
        .on_login_entry(query.action.as_deref(), &request)
    {
        Some(location) => Redirect::to(&location).into_response(),
        None => "Single sign-on is disabled. Sign in with your local account.".into_response(),
    }
}

/// Logout entry point (`/logout`).
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<LogoutQuery>,
) -> Response {
    run_logout(&state, jar, query.redirect_to).await
}

async fn run_logout(state: &AppState, jar: CookieJar, redirect_to: Option<String>) -> Response {
    let request = LogoutRequest {
        redirect_to,
        access_token: jar
            .get(ACCESS_TOKEN_COOKIE)
            .map(|c| c.value().to_string()),
        host_session: jar
            .get(HOST_SESSION_COOKIE)
            .map(|c| c.value().to_string()),
    };

    let outcome = state.controller.logout(request).await;
    let jar = jar
        .add(to_cookie(outcome.clear_access_token))
        .add(to_cookie(outcome.clear_host_session));
    (jar, Redirect::to(&outcome.location)).into_response()
}

/// Registration shortcut (`/auth/signup`) to the Casdoor signup page.
pub async fn signup(State(state): State<Arc<AppState>>) -> Redirect {
    let redirects = state.controller.redirects();
    Redirect::to(&redirects.safe_redirect(&state.controller.config().signup_url()))
}

/// Signed-in landing page.
pub async fn dashboard(RequireAuth(user): RequireAuth) -> String {
    let roles: Vec<&str> = user.account.roles().iter().map(|r| r.as_str()).collect();
    format!(
        "Signed in as {} ({}).\nRoles: {}",
        user.account.display_name(),
        user.account.username(),
        roles.join(", ")
    )
}
