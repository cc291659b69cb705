use crate::crds::{Build, CamelCatalog, IntegrationPlatform};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::runtime::controller::Controller;
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, Instrument};

pub mod build;
pub mod config;
pub mod leader;
pub mod platform;
pub mod scope;
pub mod status;
pub mod types;

pub use build::{error_policy_build, reconcile_build};
pub use config::ControllerConfig;
pub use platform::{error_policy_platform, platforms_for_catalog, reconcile_platform};
pub use scope::OperatorScope;
pub use types::{Context, Error, Result};

use build::PodBuilder;

/// Run the Build and IntegrationPlatform controllers until either stops.
#[instrument(skip(client, config), fields(operator = %config.operator.id))]
pub async fn run_task_controller(client: Client, config: ControllerConfig) -> Result<()> {
    let scope = OperatorScope::from_config(&config.operator);
    info!(
        watch_namespace = scope.watch_namespace.as_deref().unwrap_or("(all)"),
        operator_namespace = %scope.namespace,
        "Starting build scheduling controllers"
    );

    let builder = Arc::new(PodBuilder::new(client.clone(), &config.build));
    let context = Arc::new(Context::new(client.clone(), Arc::new(config), builder));

    // Startup visibility: what the scheduler is about to pick up
    match scope.api::<Build>(client.clone()).list(&ListParams::default()).await {
        Ok(list) => {
            info!("Controller startup: found {} Build(s)", list.items.len());
            for build in list.items {
                debug!(
                    name = %build.name_any(),
                    namespace = ?build.namespace(),
                    phase = %build.phase(),
                    operator_id = ?build.operator_id(),
                    "Existing Build"
                );
            }
        }
        Err(e) => {
            error!("Failed to list Builds at startup: {}", e);
        }
    }

    let build_controller_handle = tokio::spawn({
        let context = context.clone();
        let client = client.clone();
        let scope = scope.clone();
        async move { run_build_controller(client, scope, context).await }
    });

    let platform_controller_handle = tokio::spawn({
        let context = context.clone();
        let client = client.clone();
        let scope = scope.clone();
        async move { run_platform_controller(client, scope, context).await }
    });

    match tokio::try_join!(build_controller_handle, platform_controller_handle) {
        Ok((build_result, platform_result)) => {
            if let Err(e) = build_result {
                error!("Build controller failed: {:?}", e);
            }
            if let Err(e) = platform_result {
                error!("IntegrationPlatform controller failed: {:?}", e);
            }
        }
        Err(e) => {
            error!("Controller task join error: {:?}", e);
        }
    }

    info!("Task controller shutting down");
    Ok(())
}

#[instrument(skip_all)]
async fn run_build_controller(
    client: Client,
    scope: OperatorScope,
    context: Arc<Context>,
) -> Result<()> {
    info!("Starting Build controller");

    let builds = scope.api::<Build>(client.clone());
    let pods = scope.api::<Pod>(client);
    let watcher_config = Config::default().any_semantic();

    Controller::new(builds, watcher_config.clone())
        .owns(pods, watcher_config)
        .run(reconcile_build, error_policy_build, context)
        .for_each(|reconciliation_result| {
            let build_span = tracing::info_span!("build_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok(build) => {
                        debug!(resource = ?build, "Build reconciliation successful");
                    }
                    Err(reconciliation_err) => {
                        error!(error = ?reconciliation_err, "Build reconciliation error");
                    }
                }
            }
            .instrument(build_span)
        })
        .await;

    Ok(())
}

#[instrument(skip_all)]
async fn run_platform_controller(
    client: Client,
    scope: OperatorScope,
    context: Arc<Context>,
) -> Result<()> {
    info!("Starting IntegrationPlatform controller");

    let platforms = scope.api::<IntegrationPlatform>(client.clone());
    let catalogs = scope.api::<CamelCatalog>(client.clone());
    let pods = scope.api::<Pod>(client);
    let watcher_config = Config::default().any_semantic();

    let controller = Controller::new(platforms, watcher_config.clone());
    // a deleted or replaced catalog must reach the monitor of its platforms
    let known_platforms = controller.store();

    controller
        .owns(pods, watcher_config.clone())
        .watches(catalogs, watcher_config, move |catalog| {
            platforms_for_catalog(&catalog, &known_platforms.state())
        })
        .run(reconcile_platform, error_policy_platform, context)
        .for_each(|reconciliation_result| {
            let platform_span = tracing::info_span!("platform_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok(platform) => {
                        debug!(resource = ?platform, "IntegrationPlatform reconciliation successful");
                    }
                    Err(reconciliation_err) => {
                        error!(
                            error = ?reconciliation_err,
                            "IntegrationPlatform reconciliation error"
                        );
                    }
                }
            }
            .instrument(platform_span)
        })
        .await;

    Ok(())
}
