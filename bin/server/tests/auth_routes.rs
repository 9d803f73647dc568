//! Router-level tests for the Casdoor login routes.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use casdoor_sso_relying_party::{
    AccountResolver, AuthFlowController, HostSite, MemoryAccountStore,
    MemorySessionStore, ProviderConfig, ProviderConfigBuilder, RedirectValidator, SessionManager,
    TokenClient,
};
use casdoor_sso_server::{app, auth::AppState};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

const HOME: &str = "https://blog.example.com";

struct TestApp {
    router: Router,
    accounts: Arc<MemoryAccountStore>,
    sessions: Arc<MemorySessionStore>,
    provider: MockServer,
}

async fn test_app(configure: impl FnOnce(ProviderConfigBuilder) -> ProviderConfigBuilder) -> TestApp {
    let provider = MockServer::start().await;
    let config = Arc::new(
        configure(ProviderConfig::builder("client", "secret", provider.uri()))
            .build()
            .expect("valid config"),
    );
    let site = HostSite::new(HOME).expect("valid site");
    let tokens = TokenClient::new(&config, &site).expect("token client");

    let accounts = Arc::new(MemoryAccountStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let redirects = RedirectValidator::for_provider(site, &config);
    let controller = AuthFlowController::new(
        config.clone(),
        redirects.clone(),
        Arc::new(tokens),
        AccountResolver::new(accounts.clone()),
        SessionManager::new(sessions.clone(), redirects, config),
    );
    let state = Arc::new(AppState::new(controller, accounts.clone()));

    TestApp {
        router: app::router(state),
        accounts,
        sessions,
        provider,
    }
}

fn jwt(payload: serde_json::Value) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}

async fn mount_token(server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api/login/oauth/access_token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

async fn get(router: &Router, uri: &str, cookie: Option<&str>) -> Response {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    router
        .clone()
        .oneshot(request.body(Body::empty()).expect("request"))
        .await
        .expect("response")
}

fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn cookie_pair(set_cookies: &[String], name: &str) -> Option<String> {
    set_cookies
        .iter()
        .find(|c| c.starts_with(&format!("{name}=")))
        .and_then(|c| c.split(';').next())
        .map(str::to_string)
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

#[tokio::test]
async fn callback_signs_in_and_sets_cookies() {
    let app = test_app(|b| b).await;
    let token = jwt(serde_json::json!({
        "name": "alice",
        "email": "alice@example.com",
        "displayName": "Alice"
    }));
    mount_token(&app.provider, 200, serde_json::json!({ "access_token": token })).await;

    let response = get(
        &app.router,
        "/auth/casdoor?code=abc&state=%2Fdocs%2Fpage",
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/docs/page");
    let cookies = set_cookies(&response);
    let access = cookies
        .iter()
        .find(|c| c.starts_with("access_token_cookie="))
        .expect("access token cookie");
    assert!(access.contains(&token));
    assert!(access.contains("HttpOnly"));
    assert!(access.contains("Secure"));
    assert!(cookie_pair(&cookies, "session").is_some());
    assert_eq!(app.accounts.len().await, 1);
    assert_eq!(app.sessions.len().await, 1);
}

#[tokio::test]
async fn front_page_doubles_as_callback() {
    let app = test_app(|b| b).await;
    let token = jwt(serde_json::json!({ "name": "bob" }));
    mount_token(&app.provider, 200, serde_json::json!({ "access_token": token })).await;

    let response = get(&app.router, "/?auth=casdoor&code=abc", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "https://blog.example.com/");
    assert!(cookie_pair(&set_cookies(&response), "access_token_cookie").is_some());
}

#[tokio::test]
async fn session_cookie_unlocks_dashboard() {
    let app = test_app(|b| b).await;
    let token = jwt(serde_json::json!({ "name": "carol", "displayName": "Carol" }));
    mount_token(&app.provider, 200, serde_json::json!({ "access_token": token })).await;

    let signed_in = get(&app.router, "/auth/casdoor?code=abc", None).await;
    let session = cookie_pair(&set_cookies(&signed_in), "session").expect("session cookie");

    let response = get(&app.router, "/dashboard", Some(&session)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Signed in as Carol (carol)"));
}

#[tokio::test]
async fn dashboard_without_session_redirects_to_login() {
    let app = test_app(|b| b).await;

    let response = get(&app.router, "/dashboard", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        "https://blog.example.com/login?redirect_to=%2Fdashboard"
    );
}

#[tokio::test]
async fn callback_without_code_starts_authorization() {
    let app = test_app(|b| b).await;

    let response = get(&app.router, "/auth/casdoor?redirect_to=%2Fshop", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = location(&response);
    assert!(location.starts_with(&format!("{}/login/oauth/authorize?", app.provider.uri())));
    assert!(location.contains("state=%2Fshop"));
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn provider_error_is_rejected_without_cookies() {
    let app = test_app(|b| b).await;
    mount_token(
        &app.provider,
        400,
        serde_json::json!({ "error": "invalid_grant", "error_description": "code expired" }),
    )
    .await;

    let response = get(&app.router, "/auth/casdoor?code=stale", None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(app.sessions.len().await, 0);
}

#[tokio::test]
async fn login_only_rejects_unknown_users() {
    let app = test_app(|b| b.login_only(true)).await;
    let token = jwt(serde_json::json!({ "name": "mallory" }));
    mount_token(&app.provider, 200, serde_json::json!({ "access_token": token })).await;

    let response = get(&app.router, "/auth/casdoor?code=abc", None).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookies(&response).is_empty());
    assert!(app.accounts.is_empty().await);
}

#[tokio::test]
async fn login_entry_redirects_to_casdoor_with_referer_target() {
    let app = test_app(|b| b).await;
    let request = Request::builder()
        .uri("/login")
        .header(header::REFERER, "https://blog.example.com/pricing")
        .body(Body::empty())
        .expect("request");

    let response = app.router.clone().oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = location(&response);
    assert!(location.contains("/login/oauth/authorize?"));
    assert!(location.contains("state=https%3A%2F%2Fblog.example.com%2Fpricing"));
}

#[tokio::test]
async fn inactive_login_entry_renders_local_login() {
    let app = test_app(|b| b.active(false)).await;

    let response = get(&app.router, "/login", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Single sign-on is disabled"));
}

#[tokio::test]
async fn logout_with_token_goes_through_casdoor() {
    let app = test_app(|b| b).await;

    let response = get(
        &app.router,
        "/logout?redirect_to=%2Fbye",
        Some("access_token_cookie=h.p.s; session=gone"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = location(&response);
    assert!(location.starts_with(&format!("{}/api/logout?", app.provider.uri())));
    assert!(location.contains("id_token_hint=h.p.s"));
    assert!(location.contains("post_logout_redirect_uri=https%3A%2F%2Fblog.example.com%2Fbye"));
    let cookies = set_cookies(&response);
    assert!(cookies.iter().any(|c| c.starts_with("access_token_cookie=;")));
    assert!(cookies.iter().any(|c| c.starts_with("session=;")));
}

#[tokio::test]
async fn logout_without_token_stays_local() {
    let app = test_app(|b| b).await;

    let response = get(&app.router, "/login?action=logout&redirect_to=https%3A%2F%2Fevil.example", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "https://blog.example.com/");
    assert!(
        set_cookies(&response)
            .iter()
            .any(|c| c.starts_with("access_token_cookie=;"))
    );
}

#[tokio::test]
async fn auto_sso_sends_anonymous_visitors_to_casdoor() {
    let app = test_app(|b| b.auto_sso(true)).await;

    let response = get(&app.router, "/", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).contains("/login/oauth/authorize?"));
}

#[tokio::test]
async fn auto_sso_backs_off_when_a_notice_is_pending() {
    let app = test_app(|b| b.auto_sso(true)).await;

    let response = get(&app.router, "/?message=casdoor_sso_failed", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Please try again: https://blog.example.com/?auth=casdoor"));
}

#[tokio::test]
async fn signup_redirects_to_casdoor_signup_page() {
    let app = test_app(|b| b.application("blog")).await;

    let response = get(&app.router, "/auth/signup", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        format!("{}/signup/blog", app.provider.uri())
    );
}

#[tokio::test]
async fn inactive_callback_sends_visitors_home() {
    let app = test_app(|b| b.active(false)).await;

    let response = get(&app.router, "/auth/casdoor?code=abc", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "https://blog.example.com/");
    assert!(set_cookies(&response).is_empty());
}
