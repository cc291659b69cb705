use super::duration::{parse_duration, DurationError};
use super::{Condition, OPERATOR_ID_ANNOTATION, PLATFORM_ANNOTATION};
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Build Custom Resource: one request to compile an integration into an image
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "camel.apache.org", version = "v1", kind = "Build")]
#[kube(namespaced)]
#[kube(status = "BuildStatus")]
#[kube(shortname = "ikb")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[kube(printcolumn = r#"{"name":"Started","type":"date","jsonPath":".status.startedAt"}"#)]
#[kube(printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".status.duration"}"#)]
#[kube(printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.image"}"#)]
pub struct BuildSpec {
    /// Artifact coordinates the build pulls in (e.g. `camel:timer`)
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Maximum build duration (e.g. `5m`); falls back to the platform value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Base image the integration is layered on
    #[serde(default, rename = "baseImage", skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,

    /// Target image reference to publish
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    #[default]
    #[serde(rename = "")]
    None,
    Scheduling,
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
    Interrupted,
}

impl BuildPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildPhase::Succeeded | BuildPhase::Failed | BuildPhase::Error | BuildPhase::Interrupted
        )
    }

    /// Scheduling and Pending builds are waiting for a slot.
    #[must_use]
    pub fn is_waiting(self) -> bool {
        matches!(self, BuildPhase::Scheduling | BuildPhase::Pending)
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildPhase::None => "",
            BuildPhase::Scheduling => "Scheduling",
            BuildPhase::Pending => "Pending",
            BuildPhase::Running => "Running",
            BuildPhase::Succeeded => "Succeeded",
            BuildPhase::Failed => "Failed",
            BuildPhase::Error => "Error",
            BuildPhase::Interrupted => "Interrupted",
        };
        f.write_str(s)
    }
}

/// Status of the `Build`
///
/// Optional fields serialize as `null` so a merge patch of the whole status
/// clears values left over from an earlier phase.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    #[serde(default)]
    pub phase: BuildPhase,

    /// Platform that governed admission
    #[serde(default)]
    pub platform: Option<String>,

    /// Human-readable message about the current state
    #[serde(default)]
    pub message: Option<String>,

    /// When the build entered Running (RFC3339)
    #[serde(default)]
    pub started_at: Option<String>,

    /// When the build reached a terminal phase (RFC3339)
    #[serde(default)]
    pub finished_at: Option<String>,

    /// Wall-clock build time, e.g. `1m30s`
    #[serde(default)]
    pub duration: Option<String>,

    /// Image produced by a successful build
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Build {
    #[must_use]
    pub fn phase(&self) -> BuildPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    #[must_use]
    pub fn operator_id(&self) -> Option<&str> {
        self.annotations()
            .get(OPERATOR_ID_ANNOTATION)
            .map(String::as_str)
    }

    #[must_use]
    pub fn platform_hint(&self) -> Option<&str> {
        self.annotations().get(PLATFORM_ANNOTATION).map(String::as_str)
    }

    /// Timeout requested on the resource itself, if any.
    pub fn timeout(&self) -> Result<Option<Duration>, DurationError> {
        self.spec.timeout.as_deref().map(parse_duration).transpose()
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.status
            .as_ref()
            .and_then(|s| s.started_at.as_deref())
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.creation_timestamp().map(|t| t.0)
    }
}
