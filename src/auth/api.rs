//! Login transport and the user-facing error taxonomy.
//!
//! Only transport-level failures are ever surfaced to a caller of the
//! session layer, and they arrive as [`AuthError`] variants carrying a fixed
//! user-facing message per status code. A message supplied by the server
//! takes precedence over the mapped one.

use crate::guest::{GuestIdentity, VerificationStatus};
use crate::session::types::{ProjectSnapshot, SessionType};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use url::Url;

pub(crate) static APP_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid access code or token")]
    Unauthorized,
    #[error("you do not have permission to do that")]
    Forbidden,
    #[error("this account is temporarily locked")]
    Locked,
    #[error("too many attempts, please wait a few minutes")]
    RateLimited,
    #[error("server error, please try again later")]
    Server,
    #[error("network error, check your connection")]
    Network(#[source] reqwest::Error),
    #[error("no active session")]
    NoActiveSession,
    #[error("no registered guest session")]
    NoGuestSession,
    #[error("{0}")]
    Message(String),
    #[error("something went wrong, please try again")]
    Unexpected,
}

/// Maps a non-success response to the error taxonomy. The server's own
/// `message` field wins when present; otherwise the status code picks a
/// fixed variant, and anything unmapped falls back to the generic one.
pub(crate) fn error_for_status(status: StatusCode, body: Option<&Value>) -> AuthError {
    if let Some(message) = body
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
    {
        return AuthError::Message(message.to_string());
    }

    match status.as_u16() {
        401 => AuthError::Unauthorized,
        403 => AuthError::Forbidden,
        423 => AuthError::Locked,
        429 => AuthError::RateLimited,
        500 => AuthError::Server,
        _ => AuthError::Unexpected,
    }
}

/// Builds `{scheme}://{host}:{port}{path}` from a configured base URL.
/// # Errors
/// Fails when the base URL cannot be parsed, has no host, or uses an
/// unsupported scheme.
pub(crate) fn endpoint_url(base_url: &str, path: &str) -> Result<String, AuthError> {
    let url = Url::parse(base_url)
        .map_err(|e| AuthError::Message(format!("invalid API base URL: {e}")))?;

    let scheme = url.scheme();
    let host = url
        .host()
        .ok_or_else(|| AuthError::Message("invalid API base URL: no host".to_string()))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => {
                return Err(AuthError::Message(format!(
                    "invalid API base URL: unsupported scheme {scheme}"
                )))
            }
        },
    };

    let base_path = url.path().trim_end_matches('/');
    Ok(format!("{scheme}://{host}:{port}{base_path}{path}"))
}

/// How a request authenticates: a bearer token for `code`/`preview`
/// sessions, the nested guest session token for guest-only `share` sessions.
pub enum AuthHeader {
    Bearer(SecretString),
    Guest(SecretString),
}

/// One concrete login attempt. The variant fixes the default session type;
/// the server may still override it in the response.
#[derive(Debug, Clone)]
pub enum LoginRequest {
    /// Six-digit contact access code.
    AccessCode { code: String },
    /// Share-link token, optionally with a restore token from a magic link.
    ShareToken {
        token: String,
        restore: Option<String>,
    },
    /// One-time admin preview token.
    PreviewToken { token: String },
}

impl LoginRequest {
    #[must_use]
    pub fn session_type(&self) -> SessionType {
        match self {
            LoginRequest::AccessCode { .. } => SessionType::Code,
            LoginRequest::ShareToken { .. } => SessionType::Share,
            LoginRequest::PreviewToken { .. } => SessionType::Preview,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            LoginRequest::AccessCode { .. } => "/auth/login-access-code",
            LoginRequest::ShareToken { .. } => "/auth/login-tablo-share",
            LoginRequest::PreviewToken { .. } => "/auth/login-tablo-preview",
        }
    }

    fn body(&self) -> Value {
        match self {
            LoginRequest::AccessCode { code } => json!({ "code": code }),
            LoginRequest::ShareToken { token, restore } => match restore {
                Some(restore) => json!({ "token": token, "restore": restore }),
                None => json!({ "token": token }),
            },
            LoginRequest::PreviewToken { token } => json!({ "token": token }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSessionPayload {
    pub session_token: String,
    pub guest_name: String,
    #[serde(default)]
    pub guest_email: Option<String>,
    #[serde(default)]
    pub id: Option<u64>,
}

impl GuestSessionPayload {
    #[must_use]
    pub fn into_identity(self) -> GuestIdentity {
        GuestIdentity {
            session_token: SecretString::from(self.session_token),
            guest_id: self.id,
            guest_name: self.guest_name,
            guest_email: self.guest_email,
            verification_status: VerificationStatus::Verified,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_type: Option<SessionType>,
    #[serde(default)]
    pub can_finalize: Option<bool>,
    pub project: ProjectSnapshot,
    #[serde(default)]
    pub guest_session: Option<GuestSessionPayload>,
    /// Guest identity recovered through a magic-link restore token.
    #[serde(default)]
    pub restored_session: Option<GuestSessionPayload>,
    #[serde(default)]
    pub user: Option<UserPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateSessionResponse {
    pub valid: bool,
    #[serde(default)]
    pub project: Option<ProjectSnapshot>,
    #[serde(default)]
    pub can_finalize: Option<bool>,
}

pub struct AuthClient {
    base_url: String,
    client: Client,
}

impl AuthClient {
    /// # Errors
    /// Fails when the underlying HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .map_err(AuthError::Network)?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// Performs one login attempt. A failed attempt maps to the error
    /// taxonomy and leaves the caller to decide what, if anything, to store.
    /// # Errors
    /// Returns the mapped [`AuthError`] on any transport or server failure.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, AuthError> {
        let login_url = endpoint_url(&self.base_url, request.path())?;

        let span = info_span!(
            "auth.login",
            http.method = "POST",
            url = %login_url,
            session_type = %request.session_type()
        );
        let response = self
            .client
            .post(&login_url)
            .json(&request.body())
            .send()
            .instrument(span)
            .await
            .map_err(AuthError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let body: Option<Value> = response.json().await.ok();
            debug!("login rejected with {status}");
            return Err(error_for_status(status, body.as_ref()));
        }

        response.json().await.map_err(AuthError::Network)
    }

    /// Revalidates the active session on the server and returns the fresh
    /// project payload.
    /// # Errors
    /// Returns the mapped [`AuthError`]; a 401 means the credential is gone.
    pub async fn validate_session(
        &self,
        auth: &AuthHeader,
    ) -> Result<ValidateSessionResponse, AuthError> {
        let validate_url = endpoint_url(&self.base_url, "/validate-session")?;

        let span = info_span!(
            "auth.validate_session",
            http.method = "GET",
            url = %validate_url
        );
        let request = self.client.get(&validate_url);
        let response = with_auth(request, auth)
            .send()
            .instrument(span)
            .await
            .map_err(AuthError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let body: Option<Value> = response.json().await.ok();
            return Err(error_for_status(status, body.as_ref()));
        }

        response.json().await.map_err(AuthError::Network)
    }

    /// Tells the server to drop the session. Local cleanup is the caller's
    /// job and happens regardless of the outcome here.
    /// # Errors
    /// Returns the mapped [`AuthError`] on any transport or server failure.
    pub async fn logout(&self, auth: &AuthHeader) -> Result<(), AuthError> {
        let logout_url = endpoint_url(&self.base_url, "/logout")?;

        let span = info_span!(
            "auth.logout",
            http.method = "POST",
            url = %logout_url
        );
        let request = self.client.post(&logout_url).json(&json!({}));
        let response = with_auth(request, auth)
            .send()
            .instrument(span)
            .await
            .map_err(AuthError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let body: Option<Value> = response.json().await.ok();
            return Err(error_for_status(status, body.as_ref()));
        }

        Ok(())
    }
}

fn with_auth(request: reqwest::RequestBuilder, auth: &AuthHeader) -> reqwest::RequestBuilder {
    match auth {
        AuthHeader::Bearer(token) => {
            request.header("Authorization", format!("Bearer {}", token.expose_secret()))
        }
        AuthHeader::Guest(token) => request.header("X-Guest-Session", token.expose_secret()),
    }
}
