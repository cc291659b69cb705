use crate::tasks::build::builder::{Builder, BuilderError};
use crate::tasks::config::ControllerConfig;
use crate::tasks::scope::OperatorScope;
use dashmap::DashMap;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Finalizer keeping a Build around until its builder is stopped
pub const BUILD_FINALIZER_NAME: &str = "builds.camel.apache.org/finalizer";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Missing object key")]
    MissingObjectKey,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Builder error: {0}")]
    Builder(#[from] BuilderError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// A 409 from the API server: someone else wrote the object first.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(response)) => response.code == 409,
            Error::Builder(BuilderError::Kube(kube::Error::Api(response))) => {
                response.code == 409
            }
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared state handed to every reconcile
pub struct Context {
    pub client: Client,
    pub config: Arc<ControllerConfig>,
    pub operator: OperatorScope,
    pub builder: Arc<dyn Builder>,
    pub backoff: ErrorBackoff,
}

impl Context {
    #[must_use]
    pub fn new(client: Client, config: Arc<ControllerConfig>, builder: Arc<dyn Builder>) -> Self {
        let operator = OperatorScope::from_config(&config.operator);
        let backoff = ErrorBackoff::new(
            Duration::from_secs(config.build.error_backoff_base_seconds),
            Duration::from_secs(config.build.error_backoff_max_seconds),
        );
        Self {
            client,
            config,
            operator,
            builder,
            backoff,
        }
    }
}

/// Exponential retry delays keyed by object
pub struct ErrorBackoff {
    failures: DashMap<String, u32>,
    base: Duration,
    max: Duration,
}

impl ErrorBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            failures: DashMap::new(),
            base,
            max,
        }
    }

    /// Record one more failure for `key` and return the delay before retrying.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut attempts = self.failures.entry(key.to_string()).or_insert(0);
        let exponent = (*attempts).min(16);
        *attempts = attempts.saturating_add(1);
        self.base.saturating_mul(1 << exponent).min(self.max)
    }

    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    #[must_use]
    pub fn attempts(&self, key: &str) -> u32 {
        self.failures.get(key).map_or(0, |a| *a)
    }
}
