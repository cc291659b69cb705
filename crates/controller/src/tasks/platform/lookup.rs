//! Finding the platform that governs a namespace.

use crate::crds::{IntegrationPlatform, PlatformPhase};
use crate::tasks::scope::OperatorScope;
use crate::tasks::types::Result;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

/// Platform for builds in `namespace`.
///
/// Looks in the namespace itself first; a global operator then falls back
/// to the platform in its own namespace.
pub async fn find_platform(
    client: Client,
    scope: &OperatorScope,
    namespace: &str,
    hint: Option<&str>,
) -> Result<Option<IntegrationPlatform>> {
    let local: Api<IntegrationPlatform> = Api::namespaced(client.clone(), namespace);
    let platforms = local.list(&ListParams::default()).await?.items;
    if let Some(platform) = select_platform(platforms, scope, hint) {
        return Ok(Some(platform));
    }

    if scope.is_global() && namespace != scope.namespace {
        let shared: Api<IntegrationPlatform> = Api::namespaced(client, &scope.namespace);
        let platforms = shared.list(&ListParams::default()).await?.items;
        return Ok(select_platform(platforms, scope, hint));
    }

    Ok(None)
}

/// Pick among platforms of one namespace: a hinted name wins, then Ready
/// platforms, then the oldest.
#[must_use]
pub fn select_platform(
    platforms: Vec<IntegrationPlatform>,
    scope: &OperatorScope,
    hint: Option<&str>,
) -> Option<IntegrationPlatform> {
    let mut candidates: Vec<IntegrationPlatform> = platforms
        .into_iter()
        .filter(|p| scope.handles(p.operator_id()) && p.is_active())
        .collect();

    if let Some(hint) = hint {
        if let Some(pos) = candidates.iter().position(|p| p.name_any() == hint) {
            return Some(candidates.swap_remove(pos));
        }
    }

    candidates.sort_by_key(|p| {
        (
            p.phase() != PlatformPhase::Ready,
            p.creation_timestamp().map(|t| t.0),
            p.name_any(),
        )
    });
    candidates.into_iter().next()
}

/// Name of an older active platform that makes `platform` a duplicate.
///
/// A platform that already left the initial phase always wins; among fresh
/// ones the older resource wins so two simultaneous creations settle on one.
#[must_use]
pub fn duplicate_of(
    platform: &IntegrationPlatform,
    siblings: &[IntegrationPlatform],
    scope: &OperatorScope,
) -> Option<String> {
    let key = |p: &IntegrationPlatform| (p.creation_timestamp().map(|t| t.0), p.name_any());
    let own_key = key(platform);

    siblings
        .iter()
        .filter(|other| other.name_any() != platform.name_any())
        .filter(|other| scope.handles(other.operator_id()) && other.is_active())
        .find(|other| other.phase() != PlatformPhase::None || key(other) < own_key)
        .map(|other| other.name_any())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{IntegrationPlatformSpec, IntegrationPlatformStatus, OPERATOR_ID_ANNOTATION};
    use chrono::{TimeZone, Utc};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn platform(name: &str, phase: PlatformPhase, age_offset: i64) -> IntegrationPlatform {
        let mut p = IntegrationPlatform::new(name, IntegrationPlatformSpec::default());
        p.metadata.namespace = Some("default".to_string());
        p.metadata.creation_timestamp = Some(Time(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(age_offset),
        ));
        p.status = Some(IntegrationPlatformStatus {
            phase,
            ..Default::default()
        });
        p
    }

    fn scope() -> OperatorScope {
        OperatorScope::new("camel-k", "camel-k", None)
    }

    #[test]
    fn ready_platforms_are_preferred() {
        let selected = select_platform(
            vec![
                platform("old", PlatformPhase::Creating, 0),
                platform("ready", PlatformPhase::Ready, 10),
                platform("dup", PlatformPhase::Duplicate, -10),
            ],
            &scope(),
            None,
        )
        .unwrap();
        assert_eq!(selected.name_any(), "ready");
    }

    #[test]
    fn hint_overrides_preference() {
        let selected = select_platform(
            vec![
                platform("ready", PlatformPhase::Ready, 0),
                platform("pinned", PlatformPhase::Error, 10),
            ],
            &scope(),
            Some("pinned"),
        )
        .unwrap();
        assert_eq!(selected.name_any(), "pinned");
    }

    #[test]
    fn platforms_of_other_operators_are_ignored() {
        let mut foreign = platform("foreign", PlatformPhase::Ready, 0);
        foreign
            .annotations_mut()
            .insert(OPERATOR_ID_ANNOTATION.to_string(), "other".to_string());
        assert!(select_platform(vec![foreign], &scope(), None).is_none());
    }

    #[test]
    fn older_or_initialised_siblings_win() {
        let first = platform("first", PlatformPhase::None, 0);
        let second = platform("second", PlatformPhase::None, 10);
        let siblings = vec![first.clone(), second.clone()];

        assert_eq!(duplicate_of(&first, &siblings, &scope()), None);
        assert_eq!(duplicate_of(&second, &siblings, &scope()).as_deref(), Some("first"));

        let established = platform("established", PlatformPhase::Ready, 20);
        let siblings = vec![first.clone(), established];
        assert_eq!(
            duplicate_of(&first, &siblings, &scope()).as_deref(),
            Some("established")
        );

        let duplicate = platform("dup", PlatformPhase::Duplicate, -5);
        assert_eq!(duplicate_of(&first, &[duplicate], &scope()), None);
    }
}
