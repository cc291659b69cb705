use super::actions;
use crate::crds::{CamelCatalog, IntegrationPlatform, IntegrationPlatformStatus, PlatformPhase};
use crate::tasks::config::PlatformConfig;
use crate::tasks::status::status_patch;
use crate::tasks::types::{Context, Error, Result};
use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

fn object_key(platform: &IntegrationPlatform) -> String {
    format!(
        "{}/{}",
        platform.namespace().unwrap_or_default(),
        platform.name_any()
    )
}

#[instrument(skip(ctx), fields(platform = %platform.name_any(), namespace = ?platform.namespace()))]
pub async fn reconcile_platform(platform: Arc<IntegrationPlatform>, ctx: Arc<Context>) -> Result<Action> {
    if !ctx.operator.handles(platform.operator_id()) {
        debug!(
            operator_id = ?platform.operator_id(),
            "Platform belongs to another operator, skipping"
        );
        return Ok(Action::await_change());
    }

    let now = Utc::now();
    let phase = platform.phase();
    let desired = match phase {
        PlatformPhase::None | PlatformPhase::Duplicate => {
            actions::initialize(&platform, &ctx, now).await?
        }
        PlatformPhase::Warming => actions::warm(&platform, &ctx, now).await?,
        PlatformPhase::Creating => actions::create(&platform, &ctx, now).await?,
        PlatformPhase::CreateCatalog => actions::create_catalog(&platform, &ctx, now).await?,
        PlatformPhase::Ready | PlatformPhase::Error => {
            actions::monitor(&platform, &ctx, now).await?
        }
    };

    if platform.status.as_ref() != Some(&desired) {
        if desired.phase != phase {
            info!(from = %phase, to = %desired.phase, "Platform phase transition");
        }
        patch_platform_status(&ctx, &platform, &desired).await?;
    }

    ctx.backoff.reset(&object_key(&platform));
    Ok(next_action(desired.phase, &ctx.config.platform))
}

async fn patch_platform_status(
    ctx: &Context,
    platform: &IntegrationPlatform,
    status: &IntegrationPlatformStatus,
) -> Result<()> {
    let namespace = platform.namespace().ok_or(Error::MissingObjectKey)?;
    let api: Api<IntegrationPlatform> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = status_patch(platform.resource_version(), platform.status.as_ref(), status)?;
    api.patch_status(&platform.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Ready platforms are re-monitored on a slower interval; everything else
/// keeps converging.
#[must_use]
pub fn next_action(phase: PlatformPhase, config: &PlatformConfig) -> Action {
    match phase {
        PlatformPhase::Ready => Action::requeue(Duration::from_secs(config.monitor_requeue_seconds)),
        _ => Action::requeue(Duration::from_secs(config.requeue_seconds)),
    }
}

/// Platforms to re-check when a catalog in their namespace changes.
#[must_use]
pub fn platforms_for_catalog(
    catalog: &CamelCatalog,
    platforms: &[Arc<IntegrationPlatform>],
) -> Vec<ObjectRef<IntegrationPlatform>> {
    let namespace = catalog.namespace();
    platforms
        .iter()
        .filter(|platform| platform.namespace() == namespace)
        .map(|platform| ObjectRef::from_obj(platform.as_ref()))
        .collect()
}

#[instrument(skip(ctx), fields(platform = %platform.name_any()))]
pub fn error_policy_platform(platform: Arc<IntegrationPlatform>, err: &Error, ctx: Arc<Context>) -> Action {
    if err.is_conflict() {
        debug!("Platform was modified concurrently, retrying");
        return Action::requeue(Duration::from_secs(1));
    }

    let delay = ctx.backoff.next_delay(&object_key(&platform));
    error!(
        error = ?err,
        retry_in_secs = delay.as_secs(),
        "Platform reconciliation failed"
    );
    Action::requeue(delay)
}
