//! HTTP ingestion API for usage telemetry.
//!
//! Internal tools POST batches of telemetry events here; the API
//! authenticates the caller, archives the batch and triggers
//! forwarding into the analytics stream.
//!
//! # Authentication
//!
//! Two modes, tried in priority order per request:
//!
//! 1. **HMAC** - machine-to-machine callers sign
//!    `date + "\n" + path` with a shared rotating secret
//!    (`x-gu-tools-hmac-token` / `x-gu-tools-hmac-date` headers).
//! 2. **Session cookie** - interactive callers carry an SSO session
//!    cookie, verified by delegating to the external SSO service.
//!
//! # Architecture
//!
//! - **Config**: env-driven, constructed once at startup
//! - **AppState**: shared handles (archive, stream, secrets, sessions)
//! - **Auth**: stateless verification functions + the SSO seam
//! - **Routes**: healthcheck, event ingestion, tracking pixel

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod secrets;
pub mod state;

pub use self::auth::{
    sign_token, DisabledSsoVerifier, HttpSsoVerifier, Principal, SessionStatus, SessionVerifier,
    UserIdentity, HMAC_DATE_HEADER, HMAC_TOKEN_HEADER,
};
pub use self::config::Config;
pub use self::error::ApiError;
pub use self::routes::router;
pub use self::secrets::{RotationStore, SecretSource, SecretStage, SecretValue};
pub use self::state::AppState;
