//! Builder adapters: the boundary between scheduling and the job that
//! actually compiles an integration image.

use crate::crds::Build;
use crate::tasks::config::BuildConfig;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::core::ObjectMeta;
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const BUILD_LABEL: &str = "camel.apache.org/build";
pub const COMPONENT_LABEL: &str = "camel.apache.org/component";
pub const BUILDER_COMPONENT: &str = "builder";
pub const TIMEOUT_ANNOTATION: &str = "camel.apache.org/timeout";

const BUILDER_CONTAINER: &str = "builder";

#[derive(Error, Debug)]
pub enum BuilderError {
    /// Transient: retried with backoff
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Permanent: the build can never start as submitted
    #[error("build rejected: {0}")]
    Rejected(String),
}

/// What the builder reports for a running build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Running,
    Succeeded { image: Option<String> },
    Failed { message: String },
    Interrupted { message: String },
    /// No job exists for the build
    NotFound,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Builder: Send + Sync {
    /// Begin compiling the build. Starting an already started build is a no-op.
    async fn start_build(&self, build: &Build) -> Result<(), BuilderError>;

    /// Ask the running job to stop.
    async fn cancel_build(&self, build: &Build) -> Result<(), BuilderError>;

    async fn build_status(&self, build: &Build) -> Result<BuildOutcome, BuilderError>;
}

#[must_use]
pub fn builder_pod_name(build_name: &str) -> String {
    format!("camel-k-{build_name}-builder")
}

/// Runs each build in a dedicated pod owned by the `Build`.
pub struct PodBuilder {
    client: Client,
    image: String,
    service_account: String,
    grace_period_seconds: u32,
}

impl PodBuilder {
    #[must_use]
    pub fn new(client: Client, config: &BuildConfig) -> Self {
        Self {
            client,
            image: config.builder_image.reference(),
            service_account: config.builder_service_account.clone(),
            grace_period_seconds: config.cancel_grace_period_seconds,
        }
    }

    fn pods(&self, build: &Build) -> Result<Api<Pod>, BuilderError> {
        let namespace = build
            .namespace()
            .ok_or_else(|| BuilderError::Rejected("build has no namespace".to_string()))?;
        Ok(Api::namespaced(self.client.clone(), &namespace))
    }

    /// Pod manifest for a build.
    pub fn pod_for(&self, build: &Build) -> Result<Pod, BuilderError> {
        let build_name = build.name_any();
        let owner = build.controller_owner_ref(&()).ok_or_else(|| {
            BuilderError::Rejected(format!("build {build_name} has no uid"))
        })?;

        if let Some(bad) = build.spec.dependencies.iter().find(|d| d.trim().is_empty()) {
            return Err(BuilderError::Rejected(format!(
                "invalid dependency {bad:?} in build {build_name}"
            )));
        }

        let labels = BTreeMap::from([
            (BUILD_LABEL.to_string(), build_name.clone()),
            (COMPONENT_LABEL.to_string(), BUILDER_COMPONENT.to_string()),
        ]);

        let mut env = vec![
            EnvVar {
                name: "CAMEL_K_BUILD_NAME".to_string(),
                value: Some(build_name.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "CAMEL_K_BUILD_DEPENDENCIES".to_string(),
                value: Some(build.spec.dependencies.join(",")),
                ..Default::default()
            },
        ];
        if let Some(image) = &build.spec.image {
            env.push(EnvVar {
                name: "CAMEL_K_BUILD_IMAGE".to_string(),
                value: Some(image.clone()),
                ..Default::default()
            });
        }
        if let Some(base) = &build.spec.base_image {
            env.push(EnvVar {
                name: "CAMEL_K_BASE_IMAGE".to_string(),
                value: Some(base.clone()),
                ..Default::default()
            });
        }

        Ok(Pod {
            metadata: ObjectMeta {
                name: Some(builder_pod_name(&build_name)),
                namespace: build.namespace(),
                labels: Some(labels),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                service_account_name: Some(self.service_account.clone()),
                termination_grace_period_seconds: Some(i64::from(self.grace_period_seconds)),
                containers: vec![Container {
                    name: BUILDER_CONTAINER.to_string(),
                    image: Some(self.image.clone()),
                    args: Some(vec![
                        "builder".to_string(),
                        "--build-name".to_string(),
                        build_name,
                    ]),
                    env: Some(env),
                    termination_message_policy: Some("FallbackToLogsOnError".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Builder for PodBuilder {
    async fn start_build(&self, build: &Build) -> Result<(), BuilderError> {
        let pods = self.pods(build)?;
        let pod = self.pod_for(build)?;
        let pod_name = pod.name_any();

        match pods.create(&PostParams::default(), &pod).await {
            Ok(_) => {
                info!(build = %build.name_any(), pod = %pod_name, "Created builder pod");
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!(pod = %pod_name, "Builder pod already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel_build(&self, build: &Build) -> Result<(), BuilderError> {
        let pods = self.pods(build)?;
        let pod_name = builder_pod_name(&build.name_any());

        let annotate = json!({
            "metadata": {
                "annotations": { TIMEOUT_ANNOTATION: chrono::Utc::now().to_rfc3339() }
            }
        });
        match pods
            .patch(&pod_name, &PatchParams::default(), &Patch::Merge(&annotate))
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!(pod = %pod_name, "Builder pod already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let params = DeleteParams {
            grace_period_seconds: Some(self.grace_period_seconds),
            ..Default::default()
        };
        match pods.delete(&pod_name, &params).await {
            Ok(_) => {
                info!(pod = %pod_name, "Sent termination to builder pod");
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(e) => {
                warn!(pod = %pod_name, error = %e, "Failed to delete builder pod");
                Err(e.into())
            }
        }
    }

    async fn build_status(&self, build: &Build) -> Result<BuildOutcome, BuilderError> {
        let pods = self.pods(build)?;
        let pod = pods.get_opt(&builder_pod_name(&build.name_any())).await?;
        Ok(pod.as_ref().map_or(BuildOutcome::NotFound, pod_outcome))
    }
}

/// Map builder pod state onto a build outcome.
#[must_use]
pub fn pod_outcome(pod: &Pod) -> BuildOutcome {
    if pod.meta().deletion_timestamp.is_some() {
        return BuildOutcome::Interrupted {
            message: "Pod deleted".to_string(),
        };
    }

    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    match phase {
        Some("Succeeded") => BuildOutcome::Succeeded {
            image: termination_message(pod),
        },
        Some("Failed") => {
            if pod.annotations().contains_key(TIMEOUT_ANNOTATION) {
                BuildOutcome::Interrupted {
                    message: "Build timeout".to_string(),
                }
            } else {
                BuildOutcome::Failed {
                    message: termination_message(pod).unwrap_or_else(|| "Pod failed".to_string()),
                }
            }
        }
        _ => BuildOutcome::Running,
    }
}

fn termination_message(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|c| c.name == BUILDER_CONTAINER)?
        .state
        .as_ref()?
        .terminated
        .as_ref()?
        .message
        .as_ref()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}
