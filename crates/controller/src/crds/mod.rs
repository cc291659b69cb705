pub mod build;
pub mod camel_catalog;
pub mod duration;
pub mod integration_platform;

pub use build::*;
pub use camel_catalog::*;
pub use integration_platform::*;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation binding a resource to a specific operator instance
pub const OPERATOR_ID_ANNOTATION: &str = "camel.apache.org/operator.id";

/// Annotation pinning a build to a named platform
pub const PLATFORM_ANNOTATION: &str = "camel.apache.org/platform.id";

/// Condition attached to build and platform statuses
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, or Unknown)
    pub status: String,

    /// Last time the condition transitioned (RFC3339 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Reason for the condition's last transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message about the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }

    #[must_use]
    pub fn is_false(&self) -> bool {
        self.status == "False"
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Insert or update a condition in place.
///
/// `lastTransitionTime` only moves when the status flips, so re-asserting the
/// same condition leaves the list untouched and the caller can skip the write.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: bool,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) {
    let status = if status { "True" } else { "False" }.to_string();
    let message = Some(message.into());
    let reason = Some(reason.to_string());

    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        if existing.status != status {
            existing.last_transition_time = Some(now.to_rfc3339());
        }
        existing.status = status;
        existing.reason = reason;
        existing.message = message;
        return;
    }

    conditions.push(Condition {
        condition_type: condition_type.to_string(),
        status,
        last_transition_time: Some(now.to_rfc3339()),
        reason,
        message,
    });
}

/// Drop a condition by type.
pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: &str) {
    conditions.retain(|c| c.condition_type != condition_type);
}
