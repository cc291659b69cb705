//! Status writes shared by the controllers.

use crate::tasks::types::Result;
use serde::Serialize;
use serde_json::{json, Value};

/// Merge patch replacing `old` with `new`.
///
/// Keys present before but absent now are sent as `null` so the API server
/// drops them, and the patch is pinned to `resource_version`: a concurrent
/// writer makes it fail with 409 instead of being overwritten.
pub fn status_patch<S: Serialize>(
    resource_version: Option<String>,
    old: Option<&S>,
    new: &S,
) -> Result<Value> {
    let mut status = serde_json::to_value(new)?;
    if let Some(old) = old {
        null_removed_keys(&serde_json::to_value(old)?, &mut status);
    }

    let mut patch = json!({ "status": status });
    if let Some(version) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": version });
    }
    Ok(patch)
}

fn null_removed_keys(old: &Value, new: &mut Value) {
    let (Value::Object(old), Value::Object(new)) = (old, new) else {
        return;
    };
    for (key, old_value) in old {
        match new.get_mut(key) {
            Some(new_value) => null_removed_keys(old_value, new_value),
            None => {
                new.insert(key.clone(), Value::Null);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{
        IntegrationPlatformStatus, PlatformBuildSpec, PlatformPhase, RegistrySpec,
    };

    #[test]
    fn removed_nested_fields_are_nulled() {
        let old = IntegrationPlatformStatus {
            phase: PlatformPhase::Ready,
            build: PlatformBuildSpec {
                registry: RegistrySpec {
                    address: Some("registry.local".to_string()),
                    insecure: false,
                },
                max_running_builds: Some(3),
                ..Default::default()
            },
            version: Some("0.1.0".to_string()),
            ..Default::default()
        };
        let new = IntegrationPlatformStatus::default();

        let patch = status_patch(Some("42".to_string()), Some(&old), &new).unwrap();
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["status"]["phase"], "");
        assert!(patch["status"]["build"]["registry"]["address"].is_null());
        assert!(patch["status"]["build"]["maxRunningBuilds"].is_null());
        assert!(patch["status"]["version"].is_null());
    }

    #[test]
    fn first_write_has_no_nulls() {
        let new = IntegrationPlatformStatus {
            phase: PlatformPhase::Creating,
            ..Default::default()
        };
        let patch = status_patch::<IntegrationPlatformStatus>(None, None, &new).unwrap();
        assert_eq!(patch["status"]["phase"], "Creating");
        assert!(patch["status"].get("version").is_none());
        assert!(patch.get("metadata").is_none());
    }
}
