//! HTTP router for the host site.

use axum::{Router, middleware, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState};

/// Builds the host router.
///
/// Page routes run behind the auto-SSO layer; the login, logout and
/// callback entry points do not.
pub fn router(state: Arc<AppState>) -> Router {
    let site = state.controller.redirects().site();
    let dashboard_path = site.dashboard_path().to_string();
    let login_path = site.login_path().to_string();

    let pages = Router::new()
        .route("/", get(auth::home))
        .route(&dashboard_path, get(auth::dashboard))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auto_sso_layer,
        ));

    Router::new()
        .merge(pages)
        .route(&login_path, get(auth::login_entry))
        .route("/logout", get(auth::logout))
        .route("/auth/casdoor", get(auth::casdoor_callback))
        .route("/auth/signup", get(auth::signup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
