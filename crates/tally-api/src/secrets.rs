//! Resolution of currently-valid HMAC secrets across rotation.
//!
//! The shared secret lives in a managed secret store and rotates on a
//! schedule. Rotation does not propagate to every caller at once, so
//! verification accepts a request signed with either the CURRENT
//! secret or a recently rotated-out PREVIOUS one:
//!
//! - CURRENT is always valid when present;
//! - PREVIOUS is valid only if it has a value and is younger than a
//!   configured maximum age, which bounds the blast radius of a leaked
//!   rotated-out secret while tolerating propagation delay.
//!
//! Fetch failures produce an empty slot rather than an error - a
//! request signed with the other stage's secret should still verify.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Which version of the managed secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretStage {
    Current,
    Previous,
}

impl SecretStage {
    /// The provider's version-stage label.
    pub fn label(&self) -> &'static str {
        match self {
            SecretStage::Current => "AWSCURRENT",
            SecretStage::Previous => "AWSPREVIOUS",
        }
    }
}

/// One fetched secret version, possibly empty on fetch failure.
#[derive(Debug, Clone)]
pub struct SecretValue {
    pub stage: SecretStage,
    pub value: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

impl SecretValue {
    /// An empty slot for a stage that could not be fetched.
    pub fn missing(stage: SecretStage) -> Self {
        Self {
            stage,
            value: None,
            created: None,
        }
    }
}

/// Fetches one version of the named secret.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn fetch(&self, stage: SecretStage) -> SecretValue;
}

/// Resolves the set of secrets a request signature may verify against.
///
/// Memoizes for the process lifetime: secrets are fetched on first
/// need, and rotation tolerance makes that staleness acceptable for
/// the grace period. The cache is an explicit field, injectable and
/// clearable, not hidden verifier state.
pub struct RotationStore {
    source: Arc<dyn SecretSource>,
    max_previous_age: Duration,
    cache: Mutex<Option<Vec<String>>>,
}

impl RotationStore {
    pub fn new(source: Arc<dyn SecretSource>, max_previous_age: Duration) -> Self {
        Self {
            source,
            max_previous_age,
            cache: Mutex::new(None),
        }
    }

    /// All currently-valid secret values, CURRENT first.
    pub async fn valid_secrets(&self) -> Vec<String> {
        if let Some(cached) = self.cache.lock().clone() {
            return cached;
        }

        let (current, previous) = futures::join!(
            self.source.fetch(SecretStage::Current),
            self.source.fetch(SecretStage::Previous),
        );

        let now = Utc::now();
        let secrets: Vec<String> = [current, previous]
            .into_iter()
            .filter(|secret| self.is_valid(secret, now))
            .filter_map(|secret| secret.value)
            .collect();

        if secrets.is_empty() {
            warn!("no valid HMAC secrets resolved; signed requests will be rejected");
        }
        *self.cache.lock() = Some(secrets.clone());
        secrets
    }

    /// Drop the memoized secrets so the next request re-fetches.
    pub fn clear_cache(&self) {
        *self.cache.lock() = None;
    }

    fn is_valid(&self, secret: &SecretValue, now: DateTime<Utc>) -> bool {
        match secret.stage {
            SecretStage::Current => secret.value.is_some(),
            SecretStage::Previous => {
                secret.value.is_some()
                    && secret.created.is_some_and(|created| {
                        let age = now.signed_duration_since(created);
                        age.to_std()
                            .map(|age| age < self.max_previous_age)
                            .unwrap_or(true) // created in the future: clock skew, accept
                    })
            }
        }
    }
}

/// Secret source backed by AWS Secrets Manager.
pub struct SecretsManagerSource {
    client: aws_sdk_secretsmanager::Client,
    secret_id: String,
}

impl SecretsManagerSource {
    /// Create using default credentials from the environment.
    pub async fn new(secret_id: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_secretsmanager::Client::new(&config),
            secret_id: secret_id.into(),
        }
    }

    /// Create with an explicit client (custom endpoints, tests).
    pub fn with_client(
        client: aws_sdk_secretsmanager::Client,
        secret_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            secret_id: secret_id.into(),
        }
    }
}

#[async_trait]
impl SecretSource for SecretsManagerSource {
    async fn fetch(&self, stage: SecretStage) -> SecretValue {
        let response = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_id)
            .version_stage(stage.label())
            .send()
            .await;

        match response {
            Ok(output) => {
                let created = output
                    .created_date()
                    .and_then(|d| DateTime::from_timestamp(d.secs(), d.subsec_nanos()));
                info!(stage = stage.label(), created = ?created, "retrieved secret version");
                SecretValue {
                    stage,
                    value: output.secret_string().map(str::to_string),
                    created,
                }
            }
            Err(err) => {
                warn!(stage = stage.label(), error = %err, "failed to fetch secret version");
                SecretValue::missing(stage)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source returning fixed values, for validity-rule tests.
    pub(crate) struct StubSource {
        pub current: SecretValue,
        pub previous: SecretValue,
    }

    impl StubSource {
        pub(crate) fn into_store(self, max_previous_age: Duration) -> RotationStore {
            RotationStore::new(Arc::new(self), max_previous_age)
        }
    }

    #[async_trait]
    impl SecretSource for StubSource {
        async fn fetch(&self, stage: SecretStage) -> SecretValue {
            match stage {
                SecretStage::Current => self.current.clone(),
                SecretStage::Previous => self.previous.clone(),
            }
        }
    }

    fn value(stage: SecretStage, secret: &str, age: Duration) -> SecretValue {
        SecretValue {
            stage,
            value: Some(secret.to_string()),
            created: Some(Utc::now() - chrono::Duration::from_std(age).unwrap()),
        }
    }

    const MAX_AGE: Duration = Duration::from_secs(5000);

    #[tokio::test]
    async fn current_and_fresh_previous_are_both_valid() {
        let store = StubSource {
            current: value(SecretStage::Current, "new-secret", Duration::ZERO),
            previous: value(SecretStage::Previous, "old-secret", Duration::from_secs(60)),
        }
        .into_store(MAX_AGE);

        let secrets = store.valid_secrets().await;
        assert_eq!(secrets, vec!["new-secret", "old-secret"]);
    }

    #[tokio::test]
    async fn stale_previous_secret_is_excluded() {
        let store = StubSource {
            current: value(SecretStage::Current, "new-secret", Duration::ZERO),
            previous: value(
                SecretStage::Previous,
                "old-secret",
                MAX_AGE + Duration::from_secs(1),
            ),
        }
        .into_store(MAX_AGE);

        assert_eq!(store.valid_secrets().await, vec!["new-secret"]);
    }

    #[tokio::test]
    async fn previous_without_creation_date_is_excluded() {
        let mut previous = value(SecretStage::Previous, "old-secret", Duration::ZERO);
        previous.created = None;
        let store = StubSource {
            current: value(SecretStage::Current, "new-secret", Duration::ZERO),
            previous,
        }
        .into_store(MAX_AGE);

        assert_eq!(store.valid_secrets().await, vec!["new-secret"]);
    }

    #[tokio::test]
    async fn missing_current_still_yields_fresh_previous() {
        let store = StubSource {
            current: SecretValue::missing(SecretStage::Current),
            previous: value(SecretStage::Previous, "old-secret", Duration::from_secs(1)),
        }
        .into_store(MAX_AGE);

        assert_eq!(store.valid_secrets().await, vec!["old-secret"]);
    }

    #[tokio::test]
    async fn results_are_memoized_until_cleared() {
        let store = StubSource {
            current: value(SecretStage::Current, "first", Duration::ZERO),
            previous: SecretValue::missing(SecretStage::Previous),
        }
        .into_store(MAX_AGE);

        assert_eq!(store.valid_secrets().await, vec!["first"]);
        // Second call served from cache.
        assert_eq!(store.valid_secrets().await, vec!["first"]);
        store.clear_cache();
        assert_eq!(store.valid_secrets().await, vec!["first"]);
    }
}
