use super::admission::{decide, remaining_time, AdmissionInput, Decision, PlatformGate};
use super::builder::{Builder, BuilderError};
use super::queue::{BuildQueue, BuildRequest};
use crate::crds::duration::format_duration;
use crate::crds::{set_condition, Build, BuildPhase, BuildStatus};
use crate::tasks::config::BuildConfig;
use crate::tasks::platform::lookup::find_platform;
use crate::tasks::status::status_patch;
use crate::tasks::types::{Context, Error, Result, BUILD_FINALIZER_NAME};
use chrono::{DateTime, Utc};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Api, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Condition summarising how a finished build ended
pub const CONDITION_BUILD_SUCCEEDED: &str = "Succeeded";

fn object_key(build: &Build) -> String {
    format!(
        "{}/{}",
        build.namespace().unwrap_or_default(),
        build.name_any()
    )
}

#[instrument(skip(ctx), fields(build = %build.name_any(), namespace = ?build.namespace()))]
pub async fn reconcile_build(build: Arc<Build>, ctx: Arc<Context>) -> Result<Action> {
    if !ctx.operator.handles(build.operator_id()) {
        debug!(
            operator_id = ?build.operator_id(),
            "Build belongs to another operator, skipping"
        );
        return Ok(Action::await_change());
    }

    let namespace = build.namespace().ok_or(Error::MissingObjectKey)?;
    let builds: Api<Build> = Api::namespaced(ctx.client.clone(), &namespace);

    let action = finalizer(&builds, BUILD_FINALIZER_NAME, build.clone(), |event| async {
        match event {
            FinalizerEvent::Apply(build) => reconcile_build_apply(build, &ctx).await,
            FinalizerEvent::Cleanup(build) => cleanup_build(build, &ctx).await,
        }
    })
    .await
    .map_err(|e| match e {
        kube::runtime::finalizer::Error::ApplyFailed(err)
        | kube::runtime::finalizer::Error::CleanupFailed(err) => err,
        kube::runtime::finalizer::Error::AddFinalizer(e)
        | kube::runtime::finalizer::Error::RemoveFinalizer(e) => Error::KubeError(e),
        kube::runtime::finalizer::Error::UnnamedObject => Error::MissingObjectKey,
        kube::runtime::finalizer::Error::InvalidFinalizer => {
            Error::ConfigError("Invalid finalizer name".to_string())
        }
    })?;

    ctx.backoff.reset(&object_key(&build));
    Ok(action)
}

async fn reconcile_build_apply(build: Arc<Build>, ctx: &Context) -> Result<Action> {
    let now = Utc::now();
    let namespace = build.namespace().ok_or(Error::MissingObjectKey)?;

    let platform = find_platform(
        ctx.client.clone(),
        &ctx.operator,
        &namespace,
        build.platform_hint(),
    )
    .await?;
    let gate = PlatformGate::from_platform(platform.as_ref());
    let default_timeout = gate
        .timeout()
        .unwrap_or_else(|| ctx.config.build.default_timeout());

    // only admission of pending builds looks at the rest of the queue
    let queue = if build.phase() == BuildPhase::Pending {
        BuildQueue::load(ctx.client.clone(), &ctx.operator, default_timeout).await?
    } else {
        BuildQueue::default()
    };

    let AdmissionPass { request, desired } = admit_build(
        &build,
        &queue,
        &gate,
        default_timeout,
        ctx.builder.as_ref(),
        now,
    )
    .await?;

    let phase = match desired {
        Some(status) if build.status.as_ref() != Some(&status) => {
            if status.phase != request.phase {
                info!(
                    from = %request.phase,
                    to = %status.phase,
                    message = ?status.message,
                    "Build phase transition"
                );
            }
            patch_build_status(&ctx.client, &build, &status).await?;
            status.phase
        }
        _ => request.phase,
    };

    Ok(next_action(phase, &request, &ctx.config.build, now))
}

async fn cleanup_build(build: Arc<Build>, ctx: &Context) -> Result<Action> {
    if build.phase() == BuildPhase::Running {
        info!("Build deleted while running, stopping builder");
        ctx.builder.cancel_build(&build).await?;
    }
    Ok(Action::await_change())
}

/// Result of one admission pass over a build
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionPass {
    /// The build as admission saw it, phase taken from the queue listing
    /// when the build is listed there
    pub request: BuildRequest,
    /// Status to write, `None` when nothing changes
    pub desired: Option<BuildStatus>,
}

/// Decide what happens to `build` given a queue snapshot and the platform,
/// and carry the decision out through `builder`.
///
/// A Pending build takes its phase from the listing, which is fresher than
/// the watch cache the reconciler was handed.
pub async fn admit_build(
    build: &Build,
    queue: &BuildQueue,
    gate: &PlatformGate,
    default_timeout: Duration,
    builder: &dyn Builder,
    now: DateTime<Utc>,
) -> Result<AdmissionPass> {
    let mut request = BuildRequest::from_build(build, default_timeout);
    if request.phase == BuildPhase::Pending {
        if let Some(listed) = queue.builds().iter().find(|b| b.is_same(&request)) {
            request.phase = listed.phase;
            request.started_at = listed.started_at.or(request.started_at);
        }
    }

    let outcome = if request.phase == BuildPhase::Running {
        Some(builder.build_status(build).await?)
    } else {
        None
    };

    let decision = decide(&AdmissionInput {
        build: &request,
        queue,
        platform: gate,
        outcome: outcome.as_ref(),
        now,
    });
    debug!(build = %build.name_any(), phase = %request.phase, ?decision, "Admission decision");

    let desired = apply_decision(build, decision, gate.name(), builder, now).await?;
    Ok(AdmissionPass { request, desired })
}

/// Carry out a decision and return the status the build should have, or
/// `None` when there is nothing to write.
pub async fn apply_decision(
    build: &Build,
    decision: Decision,
    platform: Option<&str>,
    builder: &dyn Builder,
    now: DateTime<Utc>,
) -> Result<Option<BuildStatus>> {
    let current = build.status.clone().unwrap_or_default();
    let platform = platform.map(str::to_string).or(current.platform.clone());

    let status = match decision {
        Decision::Unchanged => return Ok(None),
        Decision::Schedule => BuildStatus {
            phase: BuildPhase::Scheduling,
            platform,
            message: None,
            ..current
        },
        Decision::Enqueue => BuildStatus {
            phase: BuildPhase::Pending,
            platform,
            message: None,
            ..current
        },
        Decision::Defer(reason) => BuildStatus {
            phase: BuildPhase::Pending,
            platform,
            message: Some(reason.message()),
            ..current
        },
        Decision::Promote => match builder.start_build(build).await {
            Ok(()) => BuildStatus {
                phase: BuildPhase::Running,
                platform,
                message: None,
                started_at: Some(now.to_rfc3339()),
                finished_at: None,
                duration: None,
                image: None,
                ..current
            },
            Err(BuilderError::Rejected(message)) => {
                warn!(build = %build.name_any(), %message, "Builder rejected build");
                finished(build, current, BuildPhase::Error, Some(message), None, now)
            }
            Err(err) => return Err(err.into()),
        },
        Decision::Interrupt { message } => {
            warn!(build = %build.name_any(), %message, "Interrupting build");
            builder.cancel_build(build).await?;
            finished(build, current, BuildPhase::Interrupted, Some(message), None, now)
        }
        Decision::Finish {
            phase,
            message,
            image,
        } => {
            let image = image.or_else(|| build.spec.image.clone());
            finished(build, current, phase, message, image, now)
        }
    };

    Ok(Some(status))
}

fn finished(
    build: &Build,
    mut status: BuildStatus,
    phase: BuildPhase,
    message: Option<String>,
    image: Option<String>,
    now: DateTime<Utc>,
) -> BuildStatus {
    let duration = build
        .started_at()
        .and_then(|started| (now - started).to_std().ok())
        .map(|d| format_duration(Duration::from_secs(d.as_secs())));

    let (succeeded, reason) = match phase {
        BuildPhase::Succeeded => (true, "BuildSucceeded"),
        BuildPhase::Interrupted => (false, "BuildInterrupted"),
        BuildPhase::Error => (false, "BuildError"),
        _ => (false, "BuildFailed"),
    };
    set_condition(
        &mut status.conditions,
        CONDITION_BUILD_SUCCEEDED,
        succeeded,
        reason,
        message.clone().unwrap_or_else(|| format!("build {}", phase.to_string().to_lowercase())),
        now,
    );

    BuildStatus {
        phase,
        message,
        finished_at: Some(now.to_rfc3339()),
        duration,
        image,
        ..status
    }
}

/// Write the full status, guarded by the resource version we decided on.
async fn patch_build_status(client: &kube::Client, build: &Build, status: &BuildStatus) -> Result<()> {
    let namespace = build.namespace().ok_or(Error::MissingObjectKey)?;
    let builds: Api<Build> = Api::namespaced(client.clone(), &namespace);

    let patch = status_patch(build.resource_version(), build.status.as_ref(), status)?;
    builds
        .patch_status(&build.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// When to look at a build again after a successful pass.
#[must_use]
pub fn next_action(
    phase: BuildPhase,
    request: &BuildRequest,
    config: &BuildConfig,
    now: DateTime<Utc>,
) -> Action {
    match phase {
        BuildPhase::Running => {
            let monitor = Duration::from_secs(config.monitor_requeue_seconds);
            let deadline = remaining_time(request, now) + Duration::from_secs(1);
            Action::requeue(monitor.min(deadline))
        }
        phase if phase.is_terminal() => Action::await_change(),
        _ => Action::requeue(Duration::from_secs(config.pending_requeue_seconds)),
    }
}

/// Error policy for the Build controller: conflicts retry fast, everything
/// else backs off per object.
#[instrument(skip(ctx), fields(build = %build.name_any()))]
pub fn error_policy_build(build: Arc<Build>, err: &Error, ctx: Arc<Context>) -> Action {
    if err.is_conflict() {
        debug!("Build was modified concurrently, retrying");
        return Action::requeue(Duration::from_secs(1));
    }

    let delay = ctx.backoff.next_delay(&object_key(&build));
    error!(
        error = ?err,
        retry_in_secs = delay.as_secs(),
        "Build reconciliation failed"
    );
    Action::requeue(delay)
}
