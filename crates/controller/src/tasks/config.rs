//! Operator Configuration
//!
//! Loaded from a mounted YAML file (usually `/config/config.yaml`) with the
//! operator identity overridable from the pod environment.

use crate::crds::duration::parse_duration;
use crate::tasks::build::strategy::OrderStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Operator id used when nothing else is configured
pub const DEFAULT_OPERATOR_ID: &str = "camel-k";

/// Main controller configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Operator identity and watch scope
    #[serde(default)]
    pub operator: OperatorConfig,

    /// Build scheduling configuration
    #[serde(default)]
    pub build: BuildConfig,

    /// Defaults applied when resolving `IntegrationPlatform` resources
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Leader election configuration
    #[serde(default, rename = "leaderElection")]
    pub leader_election: LeaderElectionConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OperatorConfig {
    /// Operator id matched against `camel.apache.org/operator.id`
    #[serde(default = "default_operator_id")]
    pub id: String,

    /// Namespace to watch; `None` makes this a global operator
    #[serde(default, rename = "watchNamespace")]
    pub watch_namespace: Option<String>,

    /// Namespace the operator itself runs in
    #[serde(default = "default_operator_namespace")]
    pub namespace: String,

    /// Pod name, used as the leader election holder identity
    #[serde(default, rename = "podName")]
    pub pod_name: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            id: default_operator_id(),
            watch_namespace: None,
            namespace: default_operator_namespace(),
            pod_name: None,
        }
    }
}

fn default_operator_id() -> String {
    DEFAULT_OPERATOR_ID.to_string()
}

fn default_operator_namespace() -> String {
    "camel-k".to_string()
}

/// Image configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ImageConfig {
    /// Image repository (e.g., "docker.io/apache/camel-k")
    pub repository: String,

    /// Image tag (e.g., "latest", "2.4.0")
    pub tag: String,
}

impl ImageConfig {
    /// Returns `true` when both repository and tag are populated.
    pub fn is_configured(&self) -> bool {
        !self.repository.trim().is_empty() && !self.tag.trim().is_empty()
    }

    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

fn default_operator_image() -> ImageConfig {
    ImageConfig {
        repository: "docker.io/apache/camel-k".to_string(),
        tag: env!("CARGO_PKG_VERSION").to_string(),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildConfig {
    /// Requeue interval for Scheduling/Pending builds
    #[serde(default = "default_pending_requeue", rename = "pendingRequeueSeconds")]
    pub pending_requeue_seconds: u64,

    /// Upper bound between two checks of a Running build
    #[serde(default = "default_monitor_requeue", rename = "monitorRequeueSeconds")]
    pub monitor_requeue_seconds: u64,

    /// Timeout used when neither the build nor its platform sets one
    #[serde(default = "default_build_timeout", rename = "defaultTimeout")]
    pub default_timeout: String,

    /// Image running the builder pods
    #[serde(default = "default_operator_image", rename = "builderImage")]
    pub builder_image: ImageConfig,

    /// ServiceAccount for builder pods
    #[serde(default = "default_builder_service_account", rename = "builderServiceAccount")]
    pub builder_service_account: String,

    /// Grace period given to a builder pod on cancellation
    #[serde(default = "default_cancel_grace", rename = "cancelGracePeriodSeconds")]
    pub cancel_grace_period_seconds: u32,

    /// First retry delay after a reconcile error
    #[serde(default = "default_backoff_base", rename = "errorBackoffBaseSeconds")]
    pub error_backoff_base_seconds: u64,

    /// Retry delay ceiling after repeated reconcile errors
    #[serde(default = "default_backoff_max", rename = "errorBackoffMaxSeconds")]
    pub error_backoff_max_seconds: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            pending_requeue_seconds: default_pending_requeue(),
            monitor_requeue_seconds: default_monitor_requeue(),
            default_timeout: default_build_timeout(),
            builder_image: default_operator_image(),
            builder_service_account: default_builder_service_account(),
            cancel_grace_period_seconds: default_cancel_grace(),
            error_backoff_base_seconds: default_backoff_base(),
            error_backoff_max_seconds: default_backoff_max(),
        }
    }
}

impl BuildConfig {
    pub fn default_timeout(&self) -> Duration {
        parse_duration(&self.default_timeout).unwrap_or(Duration::from_secs(300))
    }
}

fn default_pending_requeue() -> u64 {
    5
}

fn default_monitor_requeue() -> u64 {
    10
}

fn default_build_timeout() -> String {
    "5m".to_string()
}

fn default_builder_service_account() -> String {
    "camel-k-builder".to_string()
}

fn default_cancel_grace() -> u32 {
    30
}

fn default_backoff_base() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    #[serde(default = "default_runtime_version", rename = "runtimeVersion")]
    pub runtime_version: String,

    #[serde(default = "default_order_strategy", rename = "orderStrategy")]
    pub order_strategy: String,

    /// Default concurrency for platforms using the routine build strategy
    #[serde(default = "default_max_running_routine", rename = "maxRunningBuildsRoutine")]
    pub max_running_builds_routine: i32,

    /// Default concurrency for platforms using the pod build strategy
    #[serde(default = "default_max_running_pod", rename = "maxRunningBuildsPod")]
    pub max_running_builds_pod: i32,

    #[serde(default = "default_build_timeout", rename = "buildTimeout")]
    pub build_timeout: String,

    /// Registry used when a platform does not configure one
    #[serde(default, rename = "registryAddress")]
    pub registry_address: Option<String>,

    /// Catalogs installed into every platform namespace
    #[serde(default = "default_bundled_catalogs", rename = "bundledCatalogVersions")]
    pub bundled_catalog_versions: Vec<String>,

    /// Image running the build cache warmer
    #[serde(default = "default_operator_image", rename = "warmerImage")]
    pub warmer_image: ImageConfig,

    /// Requeue interval while a platform is not Ready
    #[serde(default = "default_pending_requeue", rename = "requeueSeconds")]
    pub requeue_seconds: u64,

    /// How often a Ready platform re-checks its catalog and registry
    #[serde(default = "default_platform_monitor_requeue", rename = "monitorRequeueSeconds")]
    pub monitor_requeue_seconds: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            runtime_version: default_runtime_version(),
            order_strategy: default_order_strategy(),
            max_running_builds_routine: default_max_running_routine(),
            max_running_builds_pod: default_max_running_pod(),
            build_timeout: default_build_timeout(),
            registry_address: None,
            bundled_catalog_versions: default_bundled_catalogs(),
            warmer_image: default_operator_image(),
            requeue_seconds: default_pending_requeue(),
            monitor_requeue_seconds: default_platform_monitor_requeue(),
        }
    }
}

fn default_platform_monitor_requeue() -> u64 {
    60
}

fn default_runtime_version() -> String {
    "3.8.1".to_string()
}

fn default_order_strategy() -> String {
    "sequential".to_string()
}

fn default_max_running_routine() -> i32 {
    3
}

fn default_max_running_pod() -> i32 {
    10
}

fn default_bundled_catalogs() -> Vec<String> {
    vec![default_runtime_version()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LeaderElectionConfig {
    #[serde(default = "default_leader_election_enabled")]
    pub enabled: bool,

    #[serde(default = "default_lease_duration", rename = "leaseDurationSeconds")]
    pub lease_duration_seconds: u64,

    #[serde(default = "default_renew_interval", rename = "renewIntervalSeconds")]
    pub renew_interval_seconds: u64,

    #[serde(default = "default_retry_interval", rename = "retryIntervalSeconds")]
    pub retry_interval_seconds: u64,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_leader_election_enabled(),
            lease_duration_seconds: default_lease_duration(),
            renew_interval_seconds: default_renew_interval(),
            retry_interval_seconds: default_retry_interval(),
        }
    }
}

fn default_leader_election_enabled() -> bool {
    true
}

fn default_lease_duration() -> u64 {
    30
}

fn default_renew_interval() -> u64 {
    10
}

fn default_retry_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address", rename = "bindAddress")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl ControllerConfig {
    /// Validate that configuration values are usable
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.operator.id.trim().is_empty() {
            return Err(anyhow::anyhow!("operator.id must not be empty"));
        }

        if self.build.pending_requeue_seconds == 0 || self.build.monitor_requeue_seconds == 0 {
            return Err(anyhow::anyhow!(
                "build.pendingRequeueSeconds and build.monitorRequeueSeconds must be positive"
            ));
        }

        if self.platform.requeue_seconds == 0 || self.platform.monitor_requeue_seconds == 0 {
            return Err(anyhow::anyhow!(
                "platform.requeueSeconds and platform.monitorRequeueSeconds must be positive"
            ));
        }

        for (field, value) in [
            ("build.defaultTimeout", &self.build.default_timeout),
            ("platform.buildTimeout", &self.platform.build_timeout),
        ] {
            let parsed = parse_duration(value).map_err(|e| anyhow::anyhow!("{field}: {e}"))?;
            if parsed.is_zero() {
                return Err(anyhow::anyhow!("{field} must be greater than zero"));
            }
        }

        if self.build.error_backoff_base_seconds == 0
            || self.build.error_backoff_base_seconds > self.build.error_backoff_max_seconds
        {
            return Err(anyhow::anyhow!(
                "build.errorBackoffBaseSeconds must be positive and not exceed build.errorBackoffMaxSeconds"
            ));
        }

        if !self.build.builder_image.is_configured() {
            return Err(anyhow::anyhow!(
                "build.builderImage must specify both repository and tag"
            ));
        }

        self.platform
            .order_strategy
            .parse::<OrderStrategy>()
            .map_err(|e| anyhow::anyhow!("platform.orderStrategy: {e}"))?;

        if self.platform.max_running_builds_routine <= 0 || self.platform.max_running_builds_pod <= 0
        {
            return Err(anyhow::anyhow!(
                "platform.maxRunningBuildsRoutine and platform.maxRunningBuildsPod must be positive"
            ));
        }

        if self.leader_election.enabled
            && self.leader_election.renew_interval_seconds >= self.leader_election.lease_duration_seconds
        {
            return Err(anyhow::anyhow!(
                "leaderElection.renewIntervalSeconds must be shorter than leaderElection.leaseDurationSeconds"
            ));
        }

        Ok(())
    }

    /// Load configuration from mounted `ConfigMap` file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: ControllerConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;

        Ok(config)
    }

    /// Apply the pod environment on top of file values.
    ///
    /// `WATCH_NAMESPACE` set to an empty string means "all namespaces".
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(id) = std::env::var("OPERATOR_ID") {
            if !id.trim().is_empty() {
                self.operator.id = id;
            }
        }
        if let Ok(watch) = std::env::var("WATCH_NAMESPACE") {
            self.operator.watch_namespace = Some(watch).filter(|ns| !ns.trim().is_empty());
        }
        if let Ok(namespace) = std::env::var("NAMESPACE") {
            if !namespace.trim().is_empty() {
                self.operator.namespace = namespace;
            }
        }
        if let Ok(pod) = std::env::var("POD_NAME") {
            self.operator.pod_name = Some(pod).filter(|p| !p.trim().is_empty());
        }
        self
    }
}
