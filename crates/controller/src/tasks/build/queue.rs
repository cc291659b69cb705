//! Pending-work model spanning every namespace the operator watches.

use crate::crds::{Build, BuildPhase};
use crate::tasks::scope::OperatorScope;
use crate::tasks::types::Result;
use chrono::{DateTime, Utc};
use kube::api::ListParams;
use kube::{Client, ResourceExt};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Scheduling view of one `Build` resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub name: String,
    pub namespace: String,
    pub dependencies: BTreeSet<String>,
    pub operator_id: Option<String>,
    pub phase: BuildPhase,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub timeout: Duration,
}

impl BuildRequest {
    /// Snapshot a resource; `default_timeout` applies when the build sets none
    /// or sets one that does not parse.
    #[must_use]
    pub fn from_build(build: &Build, default_timeout: Duration) -> Self {
        Self {
            name: build.name_any(),
            namespace: build.namespace().unwrap_or_default(),
            dependencies: build.spec.dependencies.iter().cloned().collect(),
            operator_id: build.operator_id().map(str::to_string),
            phase: build.phase(),
            created_at: build.created_at().unwrap_or_default(),
            started_at: build.started_at(),
            timeout: build.timeout().ok().flatten().unwrap_or(default_timeout),
        }
    }

    /// Ordering key: oldest first, then namespace and name for stability.
    #[must_use]
    pub fn priority_key(&self) -> (DateTime<Utc>, &str, &str) {
        (self.created_at, self.namespace.as_str(), self.name.as_str())
    }

    #[must_use]
    pub fn is_same(&self, other: &BuildRequest) -> bool {
        self.name == other.name && self.namespace == other.namespace
    }

    /// Number of dependencies shared with `deps`.
    #[must_use]
    pub fn overlap(&self, deps: &BTreeSet<String>) -> usize {
        self.dependencies.intersection(deps).count()
    }
}

/// Point-in-time listing of the builds this operator handles
#[derive(Debug, Clone, Default)]
pub struct BuildQueue {
    builds: Vec<BuildRequest>,
}

impl BuildQueue {
    #[must_use]
    pub fn new(builds: Vec<BuildRequest>) -> Self {
        Self { builds }
    }

    /// List builds straight from the API server.
    ///
    /// A watch cache may lag behind status writes made earlier in the same
    /// pass, which would let a second reconcile see a stale running count.
    pub async fn load(
        client: Client,
        scope: &OperatorScope,
        default_timeout: Duration,
    ) -> Result<Self> {
        let api = scope.api::<Build>(client);
        let list = api.list(&ListParams::default()).await?;

        let builds: Vec<BuildRequest> = list
            .items
            .iter()
            .filter(|b| scope.handles(b.operator_id()))
            .map(|b| BuildRequest::from_build(b, default_timeout))
            .collect();

        debug!(
            total = list.items.len(),
            handled = builds.len(),
            "Loaded build queue snapshot"
        );

        Ok(Self { builds })
    }

    /// Builds in Scheduling or Pending, oldest first.
    #[must_use]
    pub fn list_pending(&self) -> Vec<BuildRequest> {
        let mut pending: Vec<BuildRequest> = self
            .builds
            .iter()
            .filter(|b| b.phase.is_waiting())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.priority_key().cmp(&b.priority_key()));
        pending
    }

    #[must_use]
    pub fn list_running(&self) -> Vec<BuildRequest> {
        self.builds
            .iter()
            .filter(|b| b.phase == BuildPhase::Running)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn builds(&self) -> &[BuildRequest] {
        &self.builds
    }
}
