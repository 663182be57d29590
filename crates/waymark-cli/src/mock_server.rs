//! Mock auth backend.
//!
//! Canned responses for the login, register and forgot-password flows so
//! browser tests do not depend on a real backend. The decision logic lives
//! on [`MockAuthBackend`] as plain functions returning a status and a JSON
//! body; the axum router is a thin shell around them, and in-process tests
//! can call them directly.
//!
//! | Route | Outcome |
//! |-------|---------|
//! | `POST /api/auth/login` | 200 `{user, token}` for a known account, 400 otherwise |
//! | `POST /api/auth/register` | 409 for a taken email, 200 `{user, token}` otherwise |
//! | `POST /api/auth/forgot-password` | 200 for a known email, 404 otherwise |

use crate::error::{CliError, CliResult};
use crate::test_data::{KNOWN_EMAIL, KNOWN_PASSWORD};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Login route
pub const LOGIN_PATH: &str = "/api/auth/login";
/// Registration route
pub const REGISTER_PATH: &str = "/api/auth/register";
/// Password reset route
pub const FORGOT_PASSWORD_PATH: &str = "/api/auth/forgot-password";

/// Token handed out on every successful login or registration
pub const MOCK_TOKEN: &str = "valid-jwt-token";
/// Body message of a rejected login
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email address or password";

/// Account known to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockUser {
    /// User id
    pub id: String,
    /// Email address
    pub email: String,
    /// Password
    pub password: String,
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Role, e.g. `user` or `admin`
    pub role: String,
}

impl MockUser {
    /// Account with placeholder names and the `user` role
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            password: password.into(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            role: "user".to_string(),
        }
    }

    /// Set the role
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Public profile as returned in `{user}`
    #[must_use]
    pub fn profile(&self) -> Value {
        json!({
            "id": self.id,
            "email": self.email,
            "firstName": self.first_name,
            "lastName": self.last_name,
            "role": self.role,
        })
    }
}

/// Body of every auth request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// Email address
    #[serde(default)]
    pub email: String,
    /// Password
    #[serde(default)]
    pub password: String,
    /// First name (register only)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first_name: Option<String>,
    /// Last name (register only)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_name: Option<String>,
}

impl AuthRequest {
    /// Request carrying only credentials
    #[must_use]
    pub fn credentials(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

/// Canned auth decisions over a fixed set of accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockAuthBackend {
    users: Vec<MockUser>,
}

impl Default for MockAuthBackend {
    fn default() -> Self {
        Self {
            users: vec![MockUser::new("1", KNOWN_EMAIL, KNOWN_PASSWORD)],
        }
    }
}

impl MockAuthBackend {
    /// Backend knowing only the default account
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account
    #[must_use]
    pub fn with_user(mut self, user: MockUser) -> Self {
        self.users.push(user);
        self
    }

    /// Known accounts
    #[must_use]
    pub fn users(&self) -> &[MockUser] {
        &self.users
    }

    fn find(&self, email: &str) -> Option<&MockUser> {
        self.users.iter().find(|u| u.email == email)
    }

    /// `POST /api/auth/login`
    #[must_use]
    pub fn login(&self, request: &AuthRequest) -> (StatusCode, Value) {
        match self.find(&request.email) {
            Some(user) if user.password == request.password => (
                StatusCode::OK,
                json!({ "user": user.profile(), "token": MOCK_TOKEN }),
            ),
            _ => (
                StatusCode::BAD_REQUEST,
                json!({ "message": INVALID_CREDENTIALS_MESSAGE }),
            ),
        }
    }

    /// `POST /api/auth/register`; accounts are not persisted
    #[must_use]
    pub fn register(&self, request: &AuthRequest) -> (StatusCode, Value) {
        if self.find(&request.email).is_some() {
            return (
                StatusCode::CONFLICT,
                json!({ "message": "Email already exists" }),
            );
        }
        let user = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "email": request.email,
            "firstName": request.first_name,
            "lastName": request.last_name,
            "role": "user",
        });
        (StatusCode::OK, json!({ "user": user, "token": MOCK_TOKEN }))
    }

    /// `POST /api/auth/forgot-password`
    #[must_use]
    pub fn forgot_password(&self, request: &AuthRequest) -> (StatusCode, Value) {
        if self.find(&request.email).is_some() {
            (
                StatusCode::OK,
                json!({ "message": "Password reset email sent" }),
            )
        } else {
            (StatusCode::NOT_FOUND, json!({ "message": "User not found" }))
        }
    }
}

type Shared = State<Arc<MockAuthBackend>>;

async fn login(State(backend): Shared, Json(request): Json<AuthRequest>) -> (StatusCode, Json<Value>) {
    let (status, body) = backend.login(&request);
    tracing::debug!(email = %request.email, status = status.as_u16(), "mock login");
    (status, Json(body))
}

async fn register(State(backend): Shared, Json(request): Json<AuthRequest>) -> (StatusCode, Json<Value>) {
    let (status, body) = backend.register(&request);
    tracing::debug!(email = %request.email, status = status.as_u16(), "mock register");
    (status, Json(body))
}

async fn forgot_password(
    State(backend): Shared,
    Json(request): Json<AuthRequest>,
) -> (StatusCode, Json<Value>) {
    let (status, body) = backend.forgot_password(&request);
    tracing::debug!(email = %request.email, status = status.as_u16(), "mock forgot-password");
    (status, Json(body))
}

/// Router serving `backend` with permissive CORS
pub fn router(backend: MockAuthBackend) -> Router {
    Router::new()
        .route(LOGIN_PATH, post(login))
        .route(REGISTER_PATH, post(register))
        .route(FORGOT_PASSWORD_PATH, post(forgot_password))
        .with_state(Arc::new(backend))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Where the mock backend listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockServerConfig {
    /// Address to bind
    pub host: String,
    /// Port; 0 picks a free one
    pub port: u16,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl MockServerConfig {
    /// Listen on `host:port`
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A bound, not yet running, mock backend
#[derive(Debug)]
pub struct MockServer {
    listener: TcpListener,
    app: Router,
}

impl MockServer {
    /// Bind the listener
    pub async fn bind(config: &MockServerConfig, backend: MockAuthBackend) -> CliResult<Self> {
        let listener = TcpListener::bind(config.addr())
            .await
            .map_err(|e| CliError::server(format!("cannot bind {}: {e}", config.addr())))?;
        Ok(Self {
            listener,
            app: router(backend),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> CliResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process ends
    pub async fn run(self) -> CliResult<()> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "mock auth backend listening");
        }
        axum::serve(self.listener, self.app)
            .await
            .map_err(|e| CliError::server(e.to_string()))
    }
}
