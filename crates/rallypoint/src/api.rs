//! The auth API the session engine talks to.
//!
//! Rallypoint doesn't ship an HTTP client. The application already has
//! one (with its base URL, headers, retries...), so the engine defines
//! the [`AuthApi`] trait: the two calls it needs, and nothing else. The
//! application implements it on top of its own client; tests implement it
//! with a stub.
//!
//! The engine never retries a failed call. If the API says no, the member
//! sees the message.

use serde::{Deserialize, Serialize};

use rallypoint_session::UserProfile;

/// Credentials posted to the login endpoint.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Lets the server correlate logins from the same browser.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// What the login endpoint returns on success.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserProfile,
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// An error answer from the API, carrying a message fit for the member.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP status, when the failure came from a response and not from
    /// the network.
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

/// The auth endpoints the session engine calls.
///
/// # Trait bounds
///
/// - `Send + Sync` → one client is shared by everything that needs it.
/// - `'static` → it lives as long as the application.
///
/// # Example
///
/// ```rust
/// use rallypoint::{ApiError, AuthApi, LoginRequest, LoginResponse};
/// use rallypoint::session::UserProfile;
///
/// /// Accepts one hard-coded account. Only for demos!
/// struct DemoApi;
///
/// impl AuthApi for DemoApi {
///     async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
///         if request.password != "hunter2" {
///             return Err(ApiError::with_status(401, "Invalid email or password"));
///         }
///         Ok(LoginResponse {
///             user: UserProfile::new(1).with_email(request.email.clone()),
///             token: "demo-token".into(),
///             refresh_token: Some("demo-refresh".into()),
///         })
///     }
///
///     async fn refresh(&self, _refresh_token: &str) -> Result<String, ApiError> {
///         Ok("demo-token-2".into())
///     }
/// }
/// ```
pub trait AuthApi: Send + Sync + 'static {
    /// Exchanges credentials for a user record and tokens.
    fn login(
        &self,
        request: &LoginRequest,
    ) -> impl std::future::Future<Output = Result<LoginResponse, ApiError>> + Send;

    /// Exchanges a refresh token for a new access token.
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl std::future::Future<Output = Result<String, ApiError>> + Send;
}
