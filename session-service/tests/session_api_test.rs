mod common;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    Router,
};
use axum_extra::extract::cookie::SignedCookieJar;
use common::*;
use session_service::models::Role;
use session_service::services::cookies::cookie_key;
use session_service::services::MockBackend;
use session_service::{build_router, AppState, Application};
use std::sync::Arc;
use tower::ServiceExt;

const JWT_SECRET: &str = "test-jwt-secret";

fn app(backend: &Arc<MockBackend>, jwt_secret: Option<&str>) -> Router {
    build_router(AppState::new(test_config(jwt_secret), backend.clone()))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Failed to parse JSON")
}

fn set_cookies(response: &axum::response::Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn backend_with_member() -> Arc<MockBackend> {
    let backend = Arc::new(MockBackend::new());
    backend.add_membership(membership("u1", "org-1", Role::Admin));
    backend.add_organization(organization("org-1", "Iglesia Central"));
    backend
}

#[tokio::test]
async fn health_check_reports_service() {
    let backend = Arc::new(MockBackend::new());

    let response = app(&backend, None)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "session-service-test");
}

#[tokio::test]
async fn session_requires_bearer_token() {
    let backend = backend_with_member();

    let response = app(&backend, None)
        .oneshot(Request::builder().uri("/session").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(backend.membership_queries(), 0);
}

#[tokio::test]
async fn session_rejects_token_signed_with_another_secret() {
    let backend = backend_with_member();
    let token = access_token("u1", "someone-else", &[]);

    let response = app(&backend, Some(JWT_SECRET))
        .oneshot(
            Request::builder()
                .uri("/session")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

fn session_request(token: &str, cookies: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/session")
        .header(header::AUTHORIZATION, format!("Bearer {}", token));
    if let Some(cookies) = cookies {
        builder = builder.header(header::COOKIE, cookies);
    }
    builder.body(Body::empty()).unwrap()
}

/// The `name=value` pairs a browser would send back after this response.
fn cookie_header(response: &axum::response::Response) -> String {
    set_cookies(response)
        .iter()
        .filter_map(|c| c.split(';').next())
        .filter(|pair| !pair.ends_with('='))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Verified view of the cookies set by `response`.
fn signed_cookies(response: &axum::response::Response) -> SignedCookieJar {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(&cookie_header(response)).unwrap(),
    );
    SignedCookieJar::from_headers(&headers, cookie_key(&test_config(None).cookies))
}

fn signed_value(jar: &SignedCookieJar, name: &str) -> Option<String> {
    jar.get(name).map(|c| c.value().to_string())
}

#[tokio::test]
async fn session_resolves_role_and_organization_from_backend() {
    let backend = backend_with_member();
    let token = access_token("u1", JWT_SECRET, &[]);

    let response = app(&backend, Some(JWT_SECRET))
        .oneshot(session_request(&token, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let jar = signed_cookies(&response);
    assert_eq!(signed_value(&jar, "user_id").as_deref(), Some("u1"));
    assert_eq!(signed_value(&jar, "user_rol").as_deref(), Some("admin"));
    assert_eq!(signed_value(&jar, "user_estado").as_deref(), Some("activo"));
    assert!(!set_cookies(&response)
        .iter()
        .any(|c| c.starts_with("user_rol=admin;")));

    let body = body_json(response).await;
    assert_eq!(body["member"]["id"], "u1");
    assert_eq!(body["member"]["role"], "admin");
    assert_eq!(body["organization"]["nombre"], "Iglesia Central");
    assert_eq!(body["flags"]["is_admin"], true);
}

#[tokio::test]
async fn session_prefers_claims_in_the_token() {
    let backend = backend_with_member();
    let token = access_token("u1", JWT_SECRET, &[("org-1", Role::Tesorero)]);

    let response = app(&backend, Some(JWT_SECRET))
        .oneshot(session_request(&token, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["member"]["role"], "tesorero");
    assert_eq!(body["flags"]["is_treasurer"], true);
    assert_eq!(body["flags"]["is_admin"], false);
    // Only the organization lookup touched the membership table.
    assert_eq!(backend.membership_queries(), 1);
}

#[tokio::test]
async fn session_uses_signed_cookies_from_an_earlier_response() {
    let backend = backend_with_member();
    let token = access_token("u1", JWT_SECRET, &[]);
    let app = app(&backend, Some(JWT_SECRET));

    let first = app
        .clone()
        .oneshot(session_request(&token, None))
        .await
        .unwrap();
    let cookies = cookie_header(&first);
    let queries = backend.membership_queries();

    let response = app
        .oneshot(session_request(&token, Some(&cookies)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["member"]["role"], "admin");
    // Role came from the cookies; only the organization lookup ran.
    assert_eq!(backend.membership_queries(), queries + 1);
}

#[tokio::test]
async fn session_ignores_forged_role_cookie() {
    let backend = Arc::new(MockBackend::new());
    backend.add_membership(membership("u1", "org-1", Role::Miembro));
    backend.add_organization(organization("org-1", "Iglesia Central"));
    let token = access_token("u1", JWT_SECRET, &[]);

    let response = app(&backend, Some(JWT_SECRET))
        .oneshot(session_request(
            &token,
            Some("user_id=u1; user_rol=super_admin; user_estado=activo"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let jar = signed_cookies(&response);
    assert_eq!(signed_value(&jar, "user_rol").as_deref(), Some("miembro"));
    let body = body_json(response).await;
    assert_eq!(body["member"]["role"], "miembro");
    assert_eq!(body["flags"]["is_admin"], false);
    assert_eq!(body["flags"]["is_treasurer"], false);
    assert_eq!(body["flags"]["is_admin_or_treasurer"], false);
}

#[tokio::test]
async fn session_discards_cookies_of_another_user() {
    let backend = backend_with_member();
    backend.add_membership(membership("u7", "org-1", Role::SuperAdmin));
    let app = app(&backend, Some(JWT_SECRET));
    let first = app
        .clone()
        .oneshot(session_request(&access_token("u7", JWT_SECRET, &[]), None))
        .await
        .unwrap();
    let other_user_cookies = cookie_header(&first);

    let response = app
        .oneshot(session_request(
            &access_token("u1", JWT_SECRET, &[]),
            Some(&other_user_cookies),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let jar = signed_cookies(&response);
    assert_eq!(signed_value(&jar, "user_id").as_deref(), Some("u1"));
    assert_eq!(signed_value(&jar, "user_rol").as_deref(), Some("admin"));
    let body = body_json(response).await;
    assert_eq!(body["member"]["role"], "admin");
}

#[tokio::test]
async fn logout_clears_identity_cookies() {
    let backend = Arc::new(MockBackend::new());

    let response = app(&backend, None)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/session/logout")
                .header(
                    header::COOKIE,
                    "user_id=u1; user_rol=admin; user_estado=activo; org_id=org-1",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookies = set_cookies(&response);
    for name in ["user_id=", "user_rol=", "user_estado=", "org_id="] {
        let cookie = cookies
            .iter()
            .find(|c| c.starts_with(name))
            .unwrap_or_else(|| panic!("no removal cookie for {}", name));
        assert!(cookie.contains("Max-Age=0"), "not a removal: {}", cookie);
    }
}

#[tokio::test]
async fn application_serves_over_tcp() {
    let backend = Arc::new(MockBackend::new());
    let app = Application::with_backend(test_config(None), backend)
        .await
        .expect("Failed to build application");
    let address = format!("http://127.0.0.1:{}", app.port());

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let response = reqwest::Client::new()
        .get(format!("{}/health", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["service"], "session-service-test");
}
