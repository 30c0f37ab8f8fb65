//! Request authentication: signed HMAC or SSO session cookie.
//!
//! Machine callers sign each request; the presence of both signature
//! headers selects HMAC mode. Everything else falls through to
//! session-cookie mode, which delegates the cookie to the external SSO
//! verifier and maps its outcome.
//!
//! HMAC verification is a stateless function over an explicit secret
//! list and request details; rotation support comes from verifying
//! against every currently-valid secret (see [`crate::secrets`]).

use async_trait::async_trait;
use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `"HMAC " + base64(signature)`.
pub const HMAC_TOKEN_HEADER: &str = "x-gu-tools-hmac-token";

/// Header carrying the RFC-1123 date the signature covers.
pub const HMAC_DATE_HEADER: &str = "x-gu-tools-hmac-date";

/// Who a request was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// A signed machine-to-machine caller.
    Machine,
    /// An interactive user with a verified session.
    User(UserIdentity),
}

/// The identity behind a verified session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub email: String,
}

/// Sign `date + "\n" + path`, producing the token header value.
///
/// Shared with tests and machine clients; verification recomputes this.
pub fn sign_token(secret: &str, date: &str, path: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(date.as_bytes());
    mac.update(b"\n");
    mac.update(path.as_bytes());
    format!("HMAC {}", BASE64.encode(mac.finalize().into_bytes()))
}

/// Verify an HMAC-signed request against every valid secret.
///
/// Valid iff the date header parses, lies within the allowed symmetric
/// window of `now` (replay protection), and the signature matches for
/// at least one secret.
pub fn verify_hmac(
    secrets: &[String],
    allowed_offset: std::time::Duration,
    now: DateTime<Utc>,
    request_date: &str,
    path: &str,
    request_token: &str,
) -> bool {
    let parsed = match DateTime::parse_from_rfc2822(request_date) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(_) => return false,
    };
    let delta = now.signed_duration_since(parsed).num_milliseconds().unsigned_abs();
    if delta >= allowed_offset.as_millis() as u64 {
        return false;
    }

    let signature = match request_token.strip_prefix("HMAC ") {
        Some(encoded) => match BASE64.decode(encoded) {
            Ok(signature) => signature,
            Err(_) => return false,
        },
        None => return false,
    };

    secrets.iter().any(|secret| {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(request_date.as_bytes());
        mac.update(b"\n");
        mac.update(path.as_bytes());
        mac.verify_slice(&signature).is_ok()
    })
}

/// Outcome of delegating a session cookie to the SSO verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Valid session.
    Authorized(UserIdentity),
    /// Session past its nominal expiry; grace handling is the
    /// authenticator's job so it lives in exactly one place.
    Expired {
        identity: UserIdentity,
        expired_at: DateTime<Utc>,
    },
    /// Anything else: bad cookie, unknown user, verifier unreachable.
    NotAuthorized { reason: String },
}

/// Seam to the external SSO service.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, cookie: &str) -> SessionStatus;
}

/// Session verifier delegating to the SSO service over HTTP.
pub struct HttpSsoVerifier {
    client: reqwest::Client,
    verifier_url: String,
}

#[derive(Debug, Deserialize)]
struct SsoVerdict {
    status: String,
    email: Option<String>,
    #[serde(rename = "expiredAt")]
    expired_at: Option<DateTime<Utc>>,
}

impl HttpSsoVerifier {
    pub fn new(verifier_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            verifier_url: verifier_url.into(),
        }
    }
}

#[async_trait]
impl SessionVerifier for HttpSsoVerifier {
    async fn verify(&self, cookie: &str) -> SessionStatus {
        let response = self
            .client
            .post(&self.verifier_url)
            .json(&serde_json::json!({ "cookie": cookie }))
            .send()
            .await;

        let verdict: SsoVerdict = match response {
            Ok(response) => match response.json().await {
                Ok(verdict) => verdict,
                Err(err) => {
                    return SessionStatus::NotAuthorized {
                        reason: format!("unreadable verifier response: {err}"),
                    }
                }
            },
            Err(err) => {
                return SessionStatus::NotAuthorized {
                    reason: format!("SSO verifier unreachable: {err}"),
                }
            }
        };

        let identity = verdict.email.map(|email| UserIdentity { email });
        match (verdict.status.as_str(), identity, verdict.expired_at) {
            ("authorised", Some(identity), _) => SessionStatus::Authorized(identity),
            ("expired", Some(identity), Some(expired_at)) => SessionStatus::Expired {
                identity,
                expired_at,
            },
            (status, _, _) => SessionStatus::NotAuthorized {
                reason: format!("verifier returned status {status:?}"),
            },
        }
    }
}

/// Verifier used when no SSO endpoint is configured: cookie-based
/// requests are rejected, signed requests are unaffected.
pub struct DisabledSsoVerifier;

#[async_trait]
impl SessionVerifier for DisabledSsoVerifier {
    async fn verify(&self, _cookie: &str) -> SessionStatus {
        SessionStatus::NotAuthorized {
            reason: "session verification is not configured".to_string(),
        }
    }
}

/// Authenticate a request by either mode, HMAC first.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    path: &str,
) -> Result<Principal, ApiError> {
    let token = headers.get(HMAC_TOKEN_HEADER).and_then(|v| v.to_str().ok());
    let date = headers.get(HMAC_DATE_HEADER).and_then(|v| v.to_str().ok());

    if let (Some(token), Some(date)) = (token, date) {
        let secrets = state.secrets.valid_secrets().await;
        if verify_hmac(
            &secrets,
            state.config.hmac_allowed_offset,
            Utc::now(),
            date,
            path,
            token,
        ) {
            return Ok(Principal::Machine);
        }
        warn!(date, path, "invalid HMAC authenticated request");
        return Err(ApiError::Forbidden(
            "Invalid HMAC authenticated request".to_string(),
        ));
    }

    authenticate_session(state, headers).await.map(Principal::User)
}

/// Authenticate via session cookie only (the tracking pixel's mode).
pub async fn authenticate_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<UserIdentity, ApiError> {
    let cookie = headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::Forbidden("No session cookie present in the request".to_string())
        })?;

    match state.sessions.verify(cookie).await {
        SessionStatus::Authorized(identity) => {
            info!(email = %identity.email, "authentication succeeded");
            Ok(identity)
        }
        SessionStatus::Expired {
            identity,
            expired_at,
        } => {
            let overdue = Utc::now().signed_duration_since(expired_at);
            let grace =
                chrono::Duration::from_std(state.config.session_grace_period).unwrap_or_default();
            if overdue <= grace {
                // Tolerates clock and propagation skew right after an
                // expiry rather than bouncing a working session.
                info!(email = %identity.email, %expired_at, "session expired within grace period");
                Ok(identity)
            } else {
                info!(email = %identity.email, %expired_at, "session expired beyond grace period");
                Err(ApiError::SessionExpired)
            }
        }
        SessionStatus::NotAuthorized { reason } => {
            warn!(%reason, "session authentication failed");
            Err(ApiError::Forbidden("Invalid credentials".to_string()))
        }
    }
}
