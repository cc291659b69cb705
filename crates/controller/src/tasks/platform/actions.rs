//! One action per platform phase. Each returns the status the platform
//! should move to; the controller decides whether that needs a write.

use super::lookup::duplicate_of;
use super::resolve::{evaluate_monitor, resolve_build_spec, Observations};
use crate::crds::{
    catalog_name, set_condition, CamelCatalog, IntegrationPlatform, IntegrationPlatformStatus,
    PlatformPhase, CONDITION_BUILD_CACHE_WARMED, CONDITION_CATALOG_AVAILABLE,
};
use crate::tasks::types::{Context, Error, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use kube::api::{ListParams, PostParams};
use kube::core::ObjectMeta;
use kube::{Api, Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{info, warn};

const WARMER_COMPONENT: &str = "build-cache-warmer";

#[must_use]
pub fn warmer_pod_name(platform_name: &str) -> String {
    format!("{platform_name}-cache-warmer")
}

fn current_status(platform: &IntegrationPlatform) -> IntegrationPlatformStatus {
    platform.status.clone().unwrap_or_default()
}

fn namespace_of(platform: &IntegrationPlatform) -> Result<String> {
    platform.namespace().ok_or(Error::MissingObjectKey)
}

/// None/Duplicate: detect duplicates, resolve defaults, start warming if asked.
pub async fn initialize(
    platform: &IntegrationPlatform,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<IntegrationPlatformStatus> {
    let namespace = namespace_of(platform)?;
    let platforms: Api<IntegrationPlatform> = Api::namespaced(ctx.client.clone(), &namespace);
    let siblings = platforms.list(&ListParams::default()).await?.items;

    if let Some(winner) = duplicate_of(platform, &siblings, &ctx.operator) {
        if platform.phase() != PlatformPhase::Duplicate {
            warn!(
                platform = %platform.name_any(),
                active = %winner,
                "Platform already exists in namespace, marking as duplicate"
            );
        }
        return Ok(IntegrationPlatformStatus {
            phase: PlatformPhase::Duplicate,
            ..current_status(platform)
        });
    }

    let resolved = resolve_build_spec(
        &platform.spec.build,
        &ctx.config.platform,
        ctx.operator.is_global(),
    );

    let mut status = IntegrationPlatformStatus {
        phase: PlatformPhase::Creating,
        build: resolved,
        conditions: Vec::new(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    if status.build.build_cache_warming == Some(true) {
        create_warmer_pod(platform, &status, ctx).await?;
        set_condition(
            &mut status.conditions,
            CONDITION_BUILD_CACHE_WARMED,
            false,
            "WarmingInProgress",
            "warming the build cache",
            now,
        );
        status.phase = PlatformPhase::Warming;
    }

    Ok(status)
}

async fn create_warmer_pod(
    platform: &IntegrationPlatform,
    status: &IntegrationPlatformStatus,
    ctx: &Context,
) -> Result<()> {
    let namespace = namespace_of(platform)?;
    let owner = platform
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey)?;
    let name = warmer_pod_name(&platform.name_any());

    let mut args = vec![
        "warm".to_string(),
        "--runtime-version".to_string(),
        status.build.runtime_version.clone().unwrap_or_default(),
    ];
    if let Some(base) = &status.build.base_image {
        args.push("--base-image".to_string());
        args.push(base.clone());
    }

    let pod = Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.clone()),
            labels: Some(BTreeMap::from([(
                crate::tasks::build::builder::COMPONENT_LABEL.to_string(),
                WARMER_COMPONENT.to_string(),
            )])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "warmer".to_string(),
                image: Some(ctx.config.platform.warmer_image.reference()),
                args: Some(args),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    };

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    match pods.create(&PostParams::default(), &pod).await {
        Ok(_) => {
            info!(pod = %name, "Created build cache warmer pod");
            Ok(())
        }
        Err(kube::Error::Api(err)) if err.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Warming: follow the warmer pod.
pub async fn warm(
    platform: &IntegrationPlatform,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<IntegrationPlatformStatus> {
    let namespace = namespace_of(platform)?;
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let pod = pods.get_opt(&warmer_pod_name(&platform.name_any())).await?;
    let pod_phase = pod
        .as_ref()
        .and_then(|p| p.status.as_ref())
        .and_then(|s| s.phase.clone());

    Ok(warm_transition(current_status(platform), pod.is_some(), pod_phase.as_deref(), now))
}

/// Next status while warming, given what the warmer pod looks like.
#[must_use]
pub fn warm_transition(
    mut status: IntegrationPlatformStatus,
    pod_exists: bool,
    pod_phase: Option<&str>,
    now: DateTime<Utc>,
) -> IntegrationPlatformStatus {
    match (pod_exists, pod_phase) {
        (false, _) => {
            set_condition(
                &mut status.conditions,
                CONDITION_BUILD_CACHE_WARMED,
                false,
                "WarmingFailed",
                "build cache warmer pod not found",
                now,
            );
            status.phase = PlatformPhase::Error;
        }
        (true, Some("Succeeded")) => {
            set_condition(
                &mut status.conditions,
                CONDITION_BUILD_CACHE_WARMED,
                true,
                "WarmingSucceeded",
                "build cache warmed",
                now,
            );
            status.phase = PlatformPhase::Creating;
        }
        (true, Some("Failed")) => {
            set_condition(
                &mut status.conditions,
                CONDITION_BUILD_CACHE_WARMED,
                false,
                "WarmingFailed",
                "build cache warmer pod failed",
                now,
            );
            status.phase = PlatformPhase::Error;
        }
        (true, _) => {}
    }
    status
}

async fn catalog_exists(ctx: &Context, namespace: &str, runtime_version: &str) -> Result<bool> {
    let catalogs: Api<CamelCatalog> = Api::namespaced(ctx.client.clone(), namespace);
    Ok(catalogs.get_opt(&catalog_name(runtime_version)).await?.is_some())
}

/// Register a catalog; an existing one counts as success.
async fn install_catalog(ctx: &Context, namespace: &str, runtime_version: &str) -> Result<(), kube::Error> {
    let catalogs: Api<CamelCatalog> = Api::namespaced(ctx.client.clone(), namespace);
    match catalogs
        .create(&PostParams::default(), &CamelCatalog::for_runtime(runtime_version))
        .await
    {
        Ok(_) => {
            info!(%namespace, %runtime_version, "Installed camel catalog");
            Ok(())
        }
        Err(kube::Error::Api(err)) if err.code == 409 => Ok(()),
        Err(e) => Err(e),
    }
}

/// Creating: install bundled catalogs, then check the one this platform needs.
pub async fn create(
    platform: &IntegrationPlatform,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<IntegrationPlatformStatus> {
    let namespace = namespace_of(platform)?;
    for version in &ctx.config.platform.bundled_catalog_versions {
        install_catalog(ctx, &namespace, version).await?;
    }

    let status = current_status(platform);
    let runtime_version = status.build.runtime_version.clone().unwrap_or_default();
    if catalog_exists(ctx, &namespace, &runtime_version).await? {
        return Ok(evaluate_monitor(
            status,
            Observations {
                catalog_available: true,
            },
            now,
        ));
    }

    info!(%runtime_version, "No catalog for runtime version, creating one");
    Ok(IntegrationPlatformStatus {
        phase: PlatformPhase::CreateCatalog,
        ..status
    })
}

/// CreateCatalog: register the catalog for the platform runtime version.
pub async fn create_catalog(
    platform: &IntegrationPlatform,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<IntegrationPlatformStatus> {
    let namespace = namespace_of(platform)?;
    let mut status = current_status(platform);
    let runtime_version = status.build.runtime_version.clone().unwrap_or_default();

    match install_catalog(ctx, &namespace, &runtime_version).await {
        Ok(()) => Ok(evaluate_monitor(
            status,
            Observations {
                catalog_available: true,
            },
            now,
        )),
        Err(err) => {
            warn!(%runtime_version, error = %err, "Failed to create camel catalog");
            set_condition(
                &mut status.conditions,
                CONDITION_CATALOG_AVAILABLE,
                false,
                "CamelCatalogCreationFailed",
                format!("failed to create camel catalog {runtime_version}: {err}"),
                now,
            );
            status.phase = PlatformPhase::Error;
            Ok(status)
        }
    }
}

/// Ready/Error: re-resolve the spec and re-check what admission relies on.
pub async fn monitor(
    platform: &IntegrationPlatform,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<IntegrationPlatformStatus> {
    let namespace = namespace_of(platform)?;
    let status = current_status(platform);
    let resolved = resolve_build_spec(
        &platform.spec.build,
        &ctx.config.platform,
        ctx.operator.is_global(),
    );

    if resolved.runtime_version != status.build.runtime_version {
        info!(
            from = ?status.build.runtime_version,
            to = ?resolved.runtime_version,
            "Runtime version changed, resetting platform"
        );
        return Ok(IntegrationPlatformStatus::default());
    }

    let runtime_version = resolved.runtime_version.clone().unwrap_or_default();
    let catalog_available = catalog_exists(ctx, &namespace, &runtime_version).await?;

    Ok(evaluate_monitor(
        IntegrationPlatformStatus {
            build: resolved,
            ..status
        },
        Observations { catalog_available },
        now,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::find_condition;

    #[test]
    fn warming_waits_for_the_pod() {
        let now = Utc::now();
        let warming = IntegrationPlatformStatus {
            phase: PlatformPhase::Warming,
            ..Default::default()
        };

        let still = warm_transition(warming.clone(), true, Some("Running"), now);
        assert_eq!(still, warming);

        let done = warm_transition(warming.clone(), true, Some("Succeeded"), now);
        assert_eq!(done.phase, PlatformPhase::Creating);
        assert!(find_condition(&done.conditions, CONDITION_BUILD_CACHE_WARMED)
            .unwrap()
            .is_true());

        let failed = warm_transition(warming.clone(), true, Some("Failed"), now);
        assert_eq!(failed.phase, PlatformPhase::Error);

        let missing = warm_transition(warming, false, None, now);
        assert_eq!(missing.phase, PlatformPhase::Error);
    }

    #[test]
    fn warmer_pod_is_named_after_the_platform() {
        assert_eq!(warmer_pod_name("camel-k"), "camel-k-cache-warmer");
    }
}
