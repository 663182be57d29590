//! End-to-end login scenarios.
//!
//! The login form lives on an in-memory page whose submit button answers
//! through the mock auth backend, so the whole harness path runs: input
//! handling, API wait, network log, evidence and redirects.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;
use waymark::mock::{MockElement, MockPage, MockResponse};
use waymark::{
    keys, ActionOptions, ApiCall, ApiCallOptions, ConfigManager, InputAction, Locator,
    NetworkLogEntry, PageDriver, TestService, WaymarkResult,
};
use waymark_cli::mock_server::{INVALID_CREDENTIALS_MESSAGE, LOGIN_PATH, MOCK_TOKEN};
use waymark_cli::{router, AuthRequest, MockAuthBackend, MockUser, TestDataFactory};

const APP: &str = "http://localhost:3000";

fn login_page(backend: MockAuthBackend) -> Arc<MockPage> {
    let page = Arc::new(MockPage::new());
    page.set_content([
        MockElement::with_test_id("input", "email").attr("type", "email"),
        MockElement::with_test_id("input", "password").attr("type", "password"),
        MockElement::with_test_id("button", "submit").text("Login"),
        MockElement::with_test_id("p", "error-message")
            .text(INVALID_CREDENTIALS_MESSAGE)
            .hidden(),
    ]);
    page.set_url(format!("{APP}/login"));

    page.on_click("submit", move |page| {
        let request = AuthRequest::credentials(
            page.value_of("email").unwrap_or_default(),
            page.value_of("password").unwrap_or_default(),
        );
        let (status, body) = backend.login(&request);
        page.emit_response(
            MockResponse::json(format!("{APP}{LOGIN_PATH}"), "POST", status.as_u16(), &body)
                .with_request_body(serde_json::to_string(&request).unwrap()),
        );
        if status.is_success() {
            let home = if body["user"]["role"] == "admin" { "/admin" } else { "/" };
            page.set_url(format!("{APP}{home}"));
        } else {
            page.set_visible("error-message", true);
        }
    });
    page
}

fn service(page: &Arc<MockPage>, dir: &Path, test: &str) -> TestService {
    let mut config = ConfigManager::new();
    config.set(keys::EVIDENCE_SETTLE_DELAY_MS, 0);
    TestService::builder(page.clone(), "Auth", test)
        .with_config(config)
        .with_output_dir(dir)
        .with_console_output(false)
        .build()
        .unwrap()
}

async fn log_in(
    service: &TestService,
    email: &str,
    password: &str,
    expect: ApiCallOptions,
) -> WaymarkResult<ApiCall> {
    service
        .try_catch_handler(
            move || {
                let expect = expect.clone();
                async move {
                    service.handle_input("email", InputAction::fill(email)).await?;
                    service
                        .handle_input("password", InputAction::fill(password))
                        .await?;
                    let pending = service.expect_api_call(LOGIN_PATH, expect);
                    service.handle_input("submit", InputAction::Click).await?;
                    pending.wait().await
                }
            },
            ActionOptions::named("login"),
        )
        .await
}

fn network_log(service: &TestService) -> Vec<NetworkLogEntry> {
    serde_json::from_str(&std::fs::read_to_string(service.network_logger().file()).unwrap())
        .unwrap()
}

#[tokio::test]
async fn test_valid_login_redirects_home() {
    let dir = tempfile::tempdir().unwrap();
    let page = login_page(MockAuthBackend::new());
    let service = service(&page, dir.path(), "valid login");
    let user = TestDataFactory::valid_login_credentials();

    let call = log_in(&service, &user.email, &user.password, ApiCallOptions::post())
        .await
        .unwrap();

    assert_eq!(call.status(), 200);
    assert_eq!(call.body["token"], MOCK_TOKEN);
    assert_eq!(page.url().await.unwrap(), format!("{APP}/"));

    let logged = network_log(&service);
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].method, "POST");
    assert_eq!(logged[0].request_body.as_ref().unwrap()["email"], user.email.as_str());

    let shots: Vec<_> = std::fs::read_dir(service.artifacts().screenshots())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(shots.len(), 1);
    assert!(shots[0].starts_with("login-success-"));
}

#[tokio::test]
async fn test_admin_login_redirects_to_admin() {
    let dir = tempfile::tempdir().unwrap();
    let backend =
        MockAuthBackend::new().with_user(MockUser::new("7", "root@b.com", "hunter22").with_role("admin"));
    let page = login_page(backend);
    let service = service(&page, dir.path(), "admin login");

    let call = log_in(&service, "root@b.com", "hunter22", ApiCallOptions::post())
        .await
        .unwrap();
    assert_eq!(call.body["user"]["role"], "admin");
    assert_eq!(page.url().await.unwrap(), format!("{APP}/admin"));
}

#[tokio::test]
async fn test_invalid_login_shows_error() {
    let dir = tempfile::tempdir().unwrap();
    let page = login_page(MockAuthBackend::new());
    let service = service(&page, dir.path(), "invalid login");

    for user in TestDataFactory::invalid_login_credentials() {
        let call = log_in(
            &service,
            &user.email,
            &user.password,
            ApiCallOptions::post().with_status(400),
        )
        .await
        .unwrap();
        assert_eq!(call.body["message"], INVALID_CREDENTIALS_MESSAGE);
    }

    assert_eq!(page.url().await.unwrap(), format!("{APP}/login"));
    let error = page
        .element_handle(&Locator::test_id("error-message"))
        .await
        .unwrap()
        .unwrap();
    assert!(error.is_visible());
    assert_eq!(network_log(&service).len(), 2);
}

#[tokio::test]
async fn test_router_answers_login() {
    let app = router(MockAuthBackend::new());
    let user = TestDataFactory::valid_login_credentials();
    let body = serde_json::to_vec(&AuthRequest::credentials(user.email, "wrong")).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(LOGIN_PATH)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["message"], INVALID_CREDENTIALS_MESSAGE);
}

#[tokio::test]
async fn test_router_rejects_get() {
    let app = router(MockAuthBackend::new());
    let response = app
        .oneshot(Request::builder().uri(LOGIN_PATH).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
