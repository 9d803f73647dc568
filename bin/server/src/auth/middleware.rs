//! Authentication extractors and the auto-SSO layer.

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use casdoor_sso_relying_party::{FlowNotice, HOST_SESSION_COOKIE, HostSession, LocalAccount};
use std::sync::Arc;
use tracing::warn;

use super::AppState;

/// The signed-in account and its host session.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub account: LocalAccount,
    pub session: HostSession,
}

/// Extractor for requiring an authenticated user.
///
/// If the user is not authenticated, they are redirected to the login entry
/// with the current path as `redirect_to`.
pub struct RequireAuth(pub CurrentUser);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let not_authenticated = || AuthRejection::NotAuthenticated {
            login_url: login_url_for(&app_state, parts),
        };

        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(HOST_SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(not_authenticated)?;

        let session = app_state
            .controller
            .sessions()
            .current(&token)
            .await
            .map_err(|e| {
                warn!(error = %e, "Session lookup failed");
                AuthRejection::InternalError
            })?
            .ok_or_else(not_authenticated)?;

        let account = app_state
            .accounts
            .find_by_id(session.account_id())
            .await
            .map_err(|e| {
                warn!(error = %e, "Account lookup failed");
                AuthRejection::InternalError
            })?
            .ok_or_else(not_authenticated)?;

        Ok(RequireAuth(CurrentUser { account, session }))
    }
}

/// Extractor for optionally getting the authenticated user.
///
/// Returns None if the user is not authenticated.
pub struct OptionalAuth(pub Option<CurrentUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match RequireAuth::from_request_parts(parts, state).await {
            Ok(RequireAuth(user)) => Ok(OptionalAuth(Some(user))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}

fn login_url_for(state: &AppState, parts: &Parts) -> String {
    let site = state.controller.redirects().site();
    let current = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let encoded: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("redirect_to", current)
        .finish();
    format!("{}?{encoded}", site.login_url())
}

/// Rejection type for authentication extractors.
#[derive(Debug)]
pub enum AuthRejection {
    NotAuthenticated { login_url: String },
    InternalError,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::NotAuthenticated { login_url } => Redirect::to(&login_url).into_response(),
            Self::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

/// Sends unauthenticated page views through Casdoor when auto-SSO is on.
///
/// Callback hits and requests carrying a flow notice pass through so a
/// failed login cannot loop back into the provider.
pub async fn auto_sso_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let config = state.controller.config();
    if !config.is_active() || !config.auto_sso() {
        return next.run(request).await;
    }

    let query = request.uri().query().unwrap_or_default();
    let mut is_callback = false;
    let mut notice = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "auth" if value == "casdoor" => is_callback = true,
            "message" => notice = FlowNotice::from_code(&value),
            _ => {}
        }
    }
    if is_callback {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let OptionalAuth(user) = match OptionalAuth::from_request_parts(&mut parts, &state).await {
        Ok(auth) => auth,
        Err(never) => match never {},
    };

    if user.is_none() {
        let current = parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        if let Some(location) = state.controller.on_unauthenticated_request(current, notice) {
            return Redirect::to(&location).into_response();
        }
    }

    next.run(Request::from_parts(parts, body)).await
}
