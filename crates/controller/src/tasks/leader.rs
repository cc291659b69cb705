//! # Leader Election
//!
//! Only one operator replica with a given operator id may schedule builds at a
//! time. Leadership is a coordination/v1 Lease named `<operator-id>-lock` in
//! the operator namespace; the holder renews it in the background and steps
//! down as soon as a renewal shows someone else owns it.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, DeleteParams, PostParams};
use kube::core::ObjectMeta;
use kube::{Client, Error as KubeError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::tasks::config::LeaderElectionConfig;
use crate::tasks::scope::OperatorScope;

#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] KubeError),

    #[error("Lease is held by another holder: {holder}")]
    LockHeld { holder: String },

    #[error("Lease renewal failed: {0}")]
    RenewalFailed(String),
}

#[must_use]
pub fn lease_name(operator_id: &str) -> String {
    format!("{operator_id}-lock")
}

/// Holder identity: the pod name when running in cluster.
#[must_use]
pub fn holder_identity(pod_name: Option<&str>) -> String {
    match pod_name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("camel-k-operator-{}", uuid::Uuid::new_v4()),
    }
}

/// Whether a lease may be taken over at `now`.
#[must_use]
pub fn is_lease_expired(lease: &Lease, now: DateTime<Utc>) -> bool {
    let Some(spec) = &lease.spec else {
        return true;
    };
    if spec.holder_identity.as_deref().unwrap_or_default().is_empty() {
        return true;
    }
    let Some(renew_time) = spec.renew_time.as_ref().or(spec.acquire_time.as_ref()) else {
        return true;
    };
    let Some(duration_seconds) = spec.lease_duration_seconds else {
        return true;
    };

    renew_time.0 + chrono::Duration::seconds(i64::from(duration_seconds)) < now
}

fn holder_of(lease: &Lease) -> &str {
    lease
        .spec
        .as_ref()
        .and_then(|spec| spec.holder_identity.as_deref())
        .unwrap_or("unknown")
}

#[derive(Clone)]
pub struct LeaderElector {
    client: Client,
    namespace: String,
    lease_name: String,
    holder: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
}

impl LeaderElector {
    #[must_use]
    pub fn new(
        client: Client,
        scope: &OperatorScope,
        holder: String,
        config: &LeaderElectionConfig,
    ) -> Self {
        Self {
            client,
            namespace: scope.namespace.clone(),
            lease_name: lease_name(&scope.id),
            holder,
            lease_duration: Duration::from_secs(config.lease_duration_seconds),
            renew_interval: Duration::from_secs(config.renew_interval_seconds),
            retry_interval: Duration::from_secs(config.retry_interval_seconds),
        }
    }

    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Block until this replica holds the lease.
    pub async fn acquire(&self) -> Result<LeaderLease, LeaseError> {
        loop {
            match self.try_acquire().await {
                Ok(lease) => return Ok(lease),
                Err(LeaseError::LockHeld { holder }) => {
                    debug!(lease = %self.lease_name, %holder, "Waiting for leadership");
                }
                Err(LeaseError::KubeError(KubeError::Api(err))) if err.code == 409 => {
                    debug!(lease = %self.lease_name, "Lost the race for the lease, retrying");
                }
                Err(e) => {
                    warn!(lease = %self.lease_name, error = %e, "Leader election attempt failed");
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    pub async fn try_acquire(&self) -> Result<LeaderLease, LeaseError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, 0)),
        };

        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(lease = %self.lease_name, holder = %self.holder, "Acquired leadership");
                Ok(self.start(api))
            }
            Err(KubeError::Api(err)) if err.code == 409 => self.take_over(api, now).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Replace an existing lease if it lapsed or is already ours. The read
    /// resourceVersion rides along, so two replicas cannot both win.
    async fn take_over(&self, api: Api<Lease>, now: DateTime<Utc>) -> Result<LeaderLease, LeaseError> {
        let existing = api.get(&self.lease_name).await?;
        let ours = holder_of(&existing) == self.holder;
        if !ours && !is_lease_expired(&existing, now) {
            return Err(LeaseError::LockHeld {
                holder: holder_of(&existing).to_string(),
            });
        }

        let transitions = existing
            .spec
            .as_ref()
            .and_then(|s| s.lease_transitions)
            .unwrap_or(0);
        let mut updated = existing.clone();
        updated.spec = Some(self.lease_spec(now, if ours { transitions } else { transitions + 1 }));

        api.replace(&self.lease_name, &PostParams::default(), &updated)
            .await?;
        info!(
            lease = %self.lease_name,
            holder = %self.holder,
            previous = %holder_of(&existing),
            "Acquired leadership"
        );
        Ok(self.start(api))
    }

    fn lease_spec(&self, now: DateTime<Utc>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.holder.clone()),
            lease_duration_seconds: Some(i32::try_from(self.lease_duration.as_secs()).unwrap_or(i32::MAX)),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    fn start(&self, api: Api<Lease>) -> LeaderLease {
        let (tx, rx) = watch::channel(false);
        let elector = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(elector.renew_interval);
            interval.tick().await;
            let mut last_renewal = Utc::now();

            loop {
                interval.tick().await;
                match elector.renew(&api).await {
                    Ok(()) => {
                        last_renewal = Utc::now();
                        debug!(lease = %elector.lease_name, "Lease renewed");
                    }
                    Err(LeaseError::LockHeld { holder }) => {
                        error!(lease = %elector.lease_name, %holder, "Leadership taken over");
                        break;
                    }
                    Err(e) => {
                        let lapsed = Utc::now() - last_renewal
                            > chrono::Duration::from_std(elector.lease_duration)
                                .unwrap_or_else(|_| chrono::Duration::seconds(30));
                        warn!(lease = %elector.lease_name, error = %e, lapsed, "Lease renewal failed");
                        if lapsed {
                            break;
                        }
                    }
                }
            }
            let _ = tx.send(true);
        });

        LeaderLease {
            api_lease_name: self.lease_name.clone(),
            holder: self.holder.clone(),
            client: self.client.clone(),
            namespace: self.namespace.clone(),
            lost: rx,
            renewal_handle: Some(handle),
        }
    }

    async fn renew(&self, api: &Api<Lease>) -> Result<(), LeaseError> {
        let mut lease = api.get(&self.lease_name).await?;
        let holder = holder_of(&lease).to_string();
        if holder != self.holder {
            return Err(LeaseError::LockHeld { holder });
        }
        let spec = lease
            .spec
            .as_mut()
            .ok_or_else(|| LeaseError::RenewalFailed("lease has no spec".to_string()))?;
        spec.renew_time = Some(MicroTime(Utc::now()));
        api.replace(&self.lease_name, &PostParams::default(), &lease)
            .await?;
        Ok(())
    }
}

/// Held leadership. Dropping it stops renewal; the lease then lapses.
pub struct LeaderLease {
    api_lease_name: String,
    holder: String,
    client: Client,
    namespace: String,
    lost: watch::Receiver<bool>,
    renewal_handle: Option<tokio::task::JoinHandle<()>>,
}

impl LeaderLease {
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Resolves once renewal has given up.
    pub async fn lost(&mut self) {
        while !*self.lost.borrow() {
            if self.lost.changed().await.is_err() {
                return;
            }
        }
    }

    /// Step down and delete the lease so another replica can take over at once.
    pub async fn release(mut self) -> Result<(), LeaseError> {
        if let Some(handle) = self.renewal_handle.take() {
            handle.abort();
        }

        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        if let Some(existing) = api.get_opt(&self.api_lease_name).await? {
            if holder_of(&existing) == self.holder {
                api.delete(&self.api_lease_name, &DeleteParams::default())
                    .await?;
                info!(lease = %self.api_lease_name, "Leadership released");
            }
        }
        Ok(())
    }
}

impl Drop for LeaderLease {
    fn drop(&mut self) {
        if let Some(handle) = self.renewal_handle.take() {
            handle.abort();
        }
    }
}

/// How a leader's run came to an end
#[derive(Debug, PartialEq, Eq)]
pub enum LeadershipEnd<T> {
    /// The work returned on its own
    Finished(T),
    /// The process was asked to stop
    Shutdown,
    /// The lease was taken over or lapsed
    Lost,
}

impl<T> LeadershipEnd<T> {
    /// Whether the lease is still ours to hand back.
    #[must_use]
    pub fn releases_lease(&self) -> bool {
        !matches!(self, LeadershipEnd::Lost)
    }
}

/// Run `work` until it returns, leadership is lost or shutdown is requested.
pub async fn lead<T>(
    work: impl Future<Output = T>,
    lost: impl Future<Output = ()>,
    shutdown: impl Future<Output = ()>,
) -> LeadershipEnd<T> {
    tokio::select! {
        output = work => LeadershipEnd::Finished(output),
        () = lost => LeadershipEnd::Lost,
        () = shutdown => LeadershipEnd::Shutdown,
    }
}

/// Resolves once `true` is sent on `shutdown` or its sender is gone.
pub async fn stop_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
