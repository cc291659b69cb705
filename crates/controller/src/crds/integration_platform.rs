use super::duration::{parse_duration, DurationError};
use super::{Condition, OPERATOR_ID_ANNOTATION};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Condition types maintained on the platform status
pub const CONDITION_REGISTRY_AVAILABLE: &str = "RegistryAvailable";
pub const CONDITION_CATALOG_AVAILABLE: &str = "CamelCatalogAvailable";
pub const CONDITION_BUILD_CONFIGURATION_VALID: &str = "BuildConfigurationValid";
pub const CONDITION_BUILD_CACHE_WARMED: &str = "BuildCacheWarmed";
pub const CONDITION_SEQUENTIAL_CAPPED: &str = "SequentialConcurrencyCapped";

/// `IntegrationPlatform` Custom Resource: per-namespace build configuration
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "camel.apache.org", version = "v1", kind = "IntegrationPlatform")]
#[kube(namespaced)]
#[kube(status = "IntegrationPlatformStatus")]
#[kube(shortname = "ip")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Build strategy","type":"string","jsonPath":".status.build.buildConfiguration.strategy"}"#)]
#[kube(printcolumn = r#"{"name":"Order strategy","type":"string","jsonPath":".status.build.buildConfiguration.orderStrategy"}"#)]
#[kube(printcolumn = r#"{"name":"Max running builds","type":"integer","jsonPath":".status.build.maxRunningBuilds"}"#)]
pub struct IntegrationPlatformSpec {
    #[serde(default)]
    pub build: PlatformBuildSpec,
}

/// Build settings, used both as user input (spec) and resolved values (status)
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformBuildSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,

    #[serde(default)]
    pub build_configuration: BuildConfiguration,

    /// Upper bound on concurrently Running builds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_running_builds: Option<i32>,

    /// Default build timeout, e.g. `5m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default)]
    pub registry: RegistrySpec,

    /// Pre-populate the builder cache before declaring the platform ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_cache_warming: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,
}

impl PlatformBuildSpec {
    pub fn timeout(&self) -> Result<Option<Duration>, DurationError> {
        self.timeout.as_deref().map(parse_duration).transpose()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfiguration {
    /// Where builds run: `pod` or `routine`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// How pending builds are admitted: `sequential`, `fifo` or `dependencies`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_strategy: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default)]
    pub insecure: bool,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum PlatformPhase {
    #[default]
    #[serde(rename = "")]
    None,
    Creating,
    Warming,
    CreateCatalog,
    Ready,
    Error,
    Duplicate,
}

impl fmt::Display for PlatformPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlatformPhase::None => "",
            PlatformPhase::Creating => "Creating",
            PlatformPhase::Warming => "Warming",
            PlatformPhase::CreateCatalog => "CreateCatalog",
            PlatformPhase::Ready => "Ready",
            PlatformPhase::Error => "Error",
            PlatformPhase::Duplicate => "Duplicate",
        };
        f.write_str(s)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationPlatformStatus {
    #[serde(default)]
    pub phase: PlatformPhase,

    /// Build configuration with defaults applied; admission reads only this
    #[serde(default)]
    pub build: PlatformBuildSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Operator version that last resolved this platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl IntegrationPlatform {
    #[must_use]
    pub fn phase(&self) -> PlatformPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    #[must_use]
    pub fn operator_id(&self) -> Option<&str> {
        self.annotations()
            .get(OPERATOR_ID_ANNOTATION)
            .map(String::as_str)
    }

    /// Duplicates never take part in scheduling.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase() != PlatformPhase::Duplicate
    }

    #[must_use]
    pub fn resolved_build(&self) -> Option<&PlatformBuildSpec> {
        self.status.as_ref().map(|s| &s.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_parses_from_yaml_manifest() {
        let yaml = r"
build:
  runtimeVersion: 3.8.1
  maxRunningBuilds: 4
  timeout: 10m
  buildConfiguration:
    strategy: pod
    orderStrategy: dependencies
  registry:
    address: registry.local:5000
    insecure: true
";
        let spec: IntegrationPlatformSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.build.max_running_builds, Some(4));
        assert_eq!(
            spec.build.build_configuration.order_strategy.as_deref(),
            Some("dependencies")
        );
        assert_eq!(spec.build.timeout().unwrap(), Some(Duration::from_secs(600)));
        assert!(spec.build.registry.insecure);
    }

    #[test]
    fn new_platform_has_no_phase() {
        let platform = IntegrationPlatform::new("camel-k", IntegrationPlatformSpec::default());
        assert_eq!(platform.phase(), PlatformPhase::None);
        assert!(platform.is_active());
        assert!(platform.resolved_build().is_none());
    }
}
