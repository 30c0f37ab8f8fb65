//! Application configuration loaded from environment.
//!
//! A single struct is constructed once at process start and passed
//! down; a missing required value is fatal here, never per-request.

use std::time::Duration;

/// API configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g. "0.0.0.0:8080").
    pub bind_addr: String,

    /// S3 bucket holding the telemetry archive.
    pub bucket_name: String,

    /// Kinesis stream telemetry is forwarded to.
    pub stream_name: String,

    /// SecretsManager id of the HMAC shared secret.
    pub hmac_secret_id: String,

    /// Allowed clock skew between the signed date header and now.
    pub hmac_allowed_offset: Duration,

    /// How long a rotated-out (PREVIOUS) secret stays acceptable.
    pub max_previous_secret_age: Duration,

    /// External SSO verifier endpoint for session-cookie auth.
    /// Unset means cookie-based requests are rejected.
    pub sso_verifier_url: Option<String>,

    /// Extra validity window granted past a session's nominal expiry.
    pub session_grace_period: Duration,

    /// Origin host suffixes allowed by CORS.
    pub cors_origin_suffixes: Vec<String>,
}

/// Default HMAC clock-skew window: 5 seconds.
pub const DEFAULT_HMAC_OFFSET_MILLIS: u64 = 5000;

/// Default maximum PREVIOUS-secret age: 5 days.
pub const DEFAULT_MAX_SECRET_AGE_SECONDS: u64 = 432_000;

/// Default session grace period: 1 hour.
pub const DEFAULT_SESSION_GRACE_SECONDS: u64 = 3600;

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `TELEMETRY_BUCKET_NAME`: archive bucket
    /// - `TELEMETRY_STREAM_NAME`: forwarding stream
    /// - `HMAC_SECRET_ID`: SecretsManager id of the shared secret
    ///
    /// Optional:
    /// - `TALLY_BIND_ADDR` (default "0.0.0.0:8080")
    /// - `HMAC_DATE_OFFSET_IN_MILLIS` (default 5000)
    /// - `MAX_PREVIOUS_SECRET_AGE_SECONDS` (default 432000)
    /// - `SSO_VERIFIER_URL`
    /// - `SESSION_GRACE_PERIOD_SECONDS` (default 3600)
    /// - `CORS_ORIGIN_SUFFIXES` (comma-separated; default
    ///   ".gutools.co.uk,.dev-gutools.co.uk")
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("TALLY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let bucket_name = required("TELEMETRY_BUCKET_NAME")?;
        let stream_name = required("TELEMETRY_STREAM_NAME")?;
        let hmac_secret_id = required("HMAC_SECRET_ID")?;

        let hmac_allowed_offset = Duration::from_millis(parsed(
            "HMAC_DATE_OFFSET_IN_MILLIS",
            DEFAULT_HMAC_OFFSET_MILLIS,
        )?);
        let max_previous_secret_age = Duration::from_secs(parsed(
            "MAX_PREVIOUS_SECRET_AGE_SECONDS",
            DEFAULT_MAX_SECRET_AGE_SECONDS,
        )?);
        let session_grace_period = Duration::from_secs(parsed(
            "SESSION_GRACE_PERIOD_SECONDS",
            DEFAULT_SESSION_GRACE_SECONDS,
        )?);

        let sso_verifier_url = std::env::var("SSO_VERIFIER_URL").ok().filter(|s| !s.is_empty());

        let cors_origin_suffixes = std::env::var("CORS_ORIGIN_SUFFIXES")
            .unwrap_or_else(|_| ".gutools.co.uk,.dev-gutools.co.uk".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let config = Self {
            bind_addr,
            bucket_name,
            stream_name,
            hmac_secret_id,
            hmac_allowed_offset,
            max_previous_secret_age,
            sso_verifier_url,
            session_grace_period,
            cors_origin_suffixes,
        };

        tracing::info!(
            bind_addr = %config.bind_addr,
            bucket = %config.bucket_name,
            stream = %config.stream_name,
            sso_verifier = config.sso_verifier_url.as_deref().unwrap_or("<disabled>"),
            "configuration loaded"
        );

        Ok(config)
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!("configuration error: no value provided for environment variable {name}")
        })
}

fn parsed(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("configuration error: {name} must be an integer, got {value:?}")),
        Err(_) => Ok(default),
    }
}
