//! Shared application state available to all request handlers.

use std::sync::Arc;

use tally_pipeline::{ArchiveStore, S3ArchiveStore, KinesisStreamClient, StreamClient};

use crate::auth::{DisabledSsoVerifier, HttpSsoVerifier, SessionVerifier};
use crate::config::Config;
use crate::secrets::{RotationStore, SecretsManagerSource};

/// Handles shared by every request.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,

    /// Durable event archive.
    pub archive: Arc<dyn ArchiveStore>,

    /// Analytics stream written to after each archive write.
    pub stream: Arc<dyn StreamClient>,

    /// Currently-valid HMAC secrets.
    pub secrets: Arc<RotationStore>,

    /// External SSO session verifier.
    pub sessions: Arc<dyn SessionVerifier>,
}

impl AppState {
    /// Assemble state from explicit components. Tests inject in-memory
    /// implementations here.
    pub fn new(
        config: Config,
        archive: Arc<dyn ArchiveStore>,
        stream: Arc<dyn StreamClient>,
        secrets: Arc<RotationStore>,
        sessions: Arc<dyn SessionVerifier>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            archive,
            stream,
            secrets,
            sessions,
        }
    }

    /// Assemble production state: S3 archive, Kinesis stream,
    /// SecretsManager-backed secret rotation, HTTP SSO delegate.
    pub async fn from_config(config: Config) -> Self {
        let archive: Arc<dyn ArchiveStore> =
            Arc::new(S3ArchiveStore::new(config.bucket_name.clone()).await);
        let stream: Arc<dyn StreamClient> =
            Arc::new(KinesisStreamClient::new(config.stream_name.clone()).await);
        let secrets = Arc::new(RotationStore::new(
            Arc::new(SecretsManagerSource::new(config.hmac_secret_id.clone()).await),
            config.max_previous_secret_age,
        ));
        let sessions: Arc<dyn SessionVerifier> = match &config.sso_verifier_url {
            Some(url) => Arc::new(HttpSsoVerifier::new(url.clone())),
            None => {
                tracing::warn!("SSO_VERIFIER_URL unset; cookie-authenticated requests will be rejected");
                Arc::new(DisabledSsoVerifier)
            }
        };

        Self::new(config, archive, stream, secrets, sessions)
    }
}
