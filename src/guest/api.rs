//! HTTP client for the guest presence API.
//!
//! Thin request/response mapping only; lifecycle decisions (what to do when
//! a session turns out to be banned) belong to
//! [`super::presence::GuestPresenceService`]. Status-code mapping is shared
//! with the login client.

use super::{InvalidationReason, VerificationStatus};
use crate::auth::api::{endpoint_url, error_for_status, AuthError, APP_USER_AGENT};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info_span, Instrument};

#[derive(Debug, Clone, Serialize)]
pub struct GuestRegisterRequest {
    pub guest_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_email: Option<String>,
    pub device_identifier: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestRegisterResponse {
    pub id: u64,
    pub session_token: String,
    pub guest_name: String,
    #[serde(default)]
    pub guest_email: Option<String>,
    /// Present when registration goes through organizer review.
    #[serde(default)]
    pub verification_status: Option<VerificationStatus>,
    #[serde(default)]
    pub is_pending: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestValidateData {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestValidateResponse {
    pub valid: bool,
    #[serde(default)]
    pub data: Option<GuestValidateData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionStatusResponse {
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<InvalidationReason>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationStatusResponse {
    pub verification_status: VerificationStatus,
    #[serde(default)]
    pub is_pending: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_rejected: bool,
    #[serde(default)]
    pub is_banned: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestUpdateResponse {
    pub session_token: String,
    pub guest_name: String,
    #[serde(default)]
    pub guest_email: Option<String>,
}

pub struct GuestApi {
    base_url: String,
    client: Client,
}

impl GuestApi {
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

    /// # Errors
    /// Returns the mapped [`AuthError`] on any transport or server failure.
    pub async fn register(
        &self,
        request: &GuestRegisterRequest,
    ) -> Result<GuestRegisterResponse, AuthError> {
        let register_url = endpoint_url(&self.base_url, "/guest/register")?;

        let span = info_span!(
            "guest.register",
            http.method = "POST",
            url = %register_url
        );
        let response = self
            .client
            .post(&register_url)
            .json(request)
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

    /// One-shot check that a stored guest token is still accepted.
    /// # Errors
    /// Returns the mapped [`AuthError`] on any transport or server failure.
    pub async fn validate(
        &self,
        session_token: &SecretString,
    ) -> Result<GuestValidateResponse, AuthError> {
        let validate_url = endpoint_url(&self.base_url, "/guest/validate")?;

        let span = info_span!(
            "guest.validate",
            http.method = "POST",
            url = %validate_url
        );
        let response = self
            .client
            .post(&validate_url)
            .json(&json!({ "session_token": session_token.expose_secret() }))
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

    /// Polls whether the guest is still welcome. A 401/403 carries the
    /// verdict in its body (banned/deleted with a message), so those are
    /// decoded as a normal status response instead of an error.
    /// # Errors
    /// Returns the mapped [`AuthError`] on transport failures or other
    /// non-success statuses.
    pub async fn session_status(
        &self,
        session_token: &SecretString,
    ) -> Result<SessionStatusResponse, AuthError> {
        let status_url = endpoint_url(&self.base_url, "/guest/session-status")?;

        let span = info_span!(
            "guest.session_status",
            http.method = "GET",
            url = %status_url
        );
        let response = self
            .client
            .get(&status_url)
            .query(&[("session_token", session_token.expose_secret())])
            .send()
            .instrument(span)
            .await
            .map_err(AuthError::Network)?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 401 || status.as_u16() == 403 {
            return response.json().await.map_err(AuthError::Network);
        }

        let body: Option<Value> = response.json().await.ok();
        Err(error_for_status(status, body.as_ref()))
    }

    /// Fire-and-forget liveness signal.
    /// # Errors
    /// Returns the mapped [`AuthError`]; callers are expected to swallow it.
    pub async fn heartbeat(&self, session_token: &SecretString) -> Result<(), AuthError> {
        let heartbeat_url = endpoint_url(&self.base_url, "/guest/heartbeat")?;

        let span = info_span!(
            "guest.heartbeat",
            http.method = "POST",
            url = %heartbeat_url
        );
        let response = self
            .client
            .post(&heartbeat_url)
            .json(&json!({ "session_token": session_token.expose_secret() }))
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

    /// # Errors
    /// Returns the mapped [`AuthError`] on any transport or server failure.
    pub async fn verification_status(
        &self,
        session_token: &SecretString,
    ) -> Result<VerificationStatusResponse, AuthError> {
        let status_url = endpoint_url(&self.base_url, "/guest/verification-status")?;

        let span = info_span!(
            "guest.verification_status",
            http.method = "GET",
            url = %status_url
        );
        let response = self
            .client
            .get(&status_url)
            .query(&[("session_token", session_token.expose_secret())])
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

    /// Renames the registered guest.
    /// # Errors
    /// Returns the mapped [`AuthError`] on any transport or server failure.
    pub async fn update_guest(
        &self,
        session_token: &SecretString,
        guest_name: &str,
        guest_email: Option<&str>,
    ) -> Result<GuestUpdateResponse, AuthError> {
        let update_url = endpoint_url(&self.base_url, "/guest/update")?;

        let mut body = json!({
            "session_token": session_token.expose_secret(),
            "guest_name": guest_name,
        });
        if let Some(email) = guest_email {
            body["guest_email"] = Value::String(email.to_string());
        }

        let span = info_span!(
            "guest.update",
            http.method = "PUT",
            url = %update_url
        );
        let response = self
            .client
            .put(&update_url)
            .json(&body)
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
}
