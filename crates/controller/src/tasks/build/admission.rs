//! Per-build admission decisions.
//!
//! `decide` is a pure function of the build, a fresh queue snapshot, the
//! governing platform and (for running builds) what the builder reports.
//! Applying the decision is left to the reconciler.

use super::builder::BuildOutcome;
use super::queue::{BuildQueue, BuildRequest};
use super::strategy::{capacity, ConfigurationError, OrderStrategy};
use crate::crds::{BuildPhase, IntegrationPlatform, PlatformPhase};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use std::time::Duration;

/// What admission knows about the platform governing a build
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformGate {
    Missing,
    NotReady {
        name: String,
        phase: PlatformPhase,
    },
    Ready {
        name: String,
        strategy: Result<OrderStrategy, ConfigurationError>,
        max_running: i32,
        timeout: Option<Duration>,
    },
}

impl PlatformGate {
    /// Read the resolved (status) configuration of a platform.
    #[must_use]
    pub fn from_platform(platform: Option<&IntegrationPlatform>) -> Self {
        let Some(platform) = platform else {
            return PlatformGate::Missing;
        };
        let name = platform.name_any();
        let phase = platform.phase();
        if phase != PlatformPhase::Ready {
            return PlatformGate::NotReady { name, phase };
        }

        let resolved = platform.resolved_build().cloned().unwrap_or_default();
        let strategy = resolved
            .build_configuration
            .order_strategy
            .as_deref()
            .map_or(Ok(OrderStrategy::default()), str::parse);

        PlatformGate::Ready {
            name,
            strategy,
            max_running: resolved.max_running_builds.unwrap_or(0),
            timeout: resolved.timeout().ok().flatten(),
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            PlatformGate::Missing => None,
            PlatformGate::NotReady { name, .. } | PlatformGate::Ready { name, .. } => Some(name),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            PlatformGate::Ready { timeout, .. } => *timeout,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeferReason {
    PlatformMissing,
    PlatformNotReady { name: String, phase: PlatformPhase },
    Configuration(ConfigurationError),
    CapacityExhausted { running: usize, max_running: i32 },
    NotSelected { strategy: OrderStrategy },
}

impl DeferReason {
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            DeferReason::PlatformMissing => "waiting for an integration platform".to_string(),
            DeferReason::PlatformNotReady { name, phase } => {
                format!("waiting for platform {name} to be ready (phase {phase:?})")
            }
            DeferReason::Configuration(err) => format!("platform configuration error: {err}"),
            DeferReason::CapacityExhausted {
                running,
                max_running,
            } => format!("waiting for a free build slot ({running}/{max_running} running)"),
            DeferReason::NotSelected { strategy } => {
                format!("queued behind other builds ({strategy} order strategy)")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Nothing to write
    Unchanged,
    /// None -> Scheduling
    Schedule,
    /// Scheduling -> Pending
    Enqueue,
    /// Stay Pending
    Defer(DeferReason),
    /// Pending -> Running, after the builder accepts the build
    Promote,
    /// Running -> Interrupted, after asking the builder to stop
    Interrupt { message: String },
    /// Running -> terminal, as reported by the builder
    Finish {
        phase: BuildPhase,
        message: Option<String>,
        image: Option<String>,
    },
}

pub struct AdmissionInput<'a> {
    pub build: &'a BuildRequest,
    pub queue: &'a BuildQueue,
    pub platform: &'a PlatformGate,
    /// Builder report, only consulted for Running builds
    pub outcome: Option<&'a BuildOutcome>,
    pub now: DateTime<Utc>,
}

#[must_use]
pub fn decide(input: &AdmissionInput<'_>) -> Decision {
    match input.build.phase {
        BuildPhase::None => Decision::Schedule,
        BuildPhase::Scheduling => Decision::Enqueue,
        BuildPhase::Pending => decide_pending(input),
        BuildPhase::Running => decide_running(input),
        BuildPhase::Succeeded | BuildPhase::Failed | BuildPhase::Error | BuildPhase::Interrupted => {
            Decision::Unchanged
        }
    }
}

fn decide_pending(input: &AdmissionInput<'_>) -> Decision {
    let (strategy, max_running) = match input.platform {
        PlatformGate::Missing => return Decision::Defer(DeferReason::PlatformMissing),
        PlatformGate::NotReady { name, phase } => {
            return Decision::Defer(DeferReason::PlatformNotReady {
                name: name.clone(),
                phase: *phase,
            })
        }
        PlatformGate::Ready {
            strategy,
            max_running,
            ..
        } => match strategy {
            Ok(strategy) => (*strategy, *max_running),
            Err(err) => return Decision::Defer(DeferReason::Configuration(err.clone())),
        },
    };

    if max_running <= 0 {
        return Decision::Defer(DeferReason::Configuration(
            ConfigurationError::NonPositiveMaxRunningBuilds(max_running),
        ));
    }

    let pending = input.queue.list_pending();
    let running = input.queue.list_running();
    let selected = strategy.select_next(&pending, &running, max_running);

    if selected.iter().any(|b| b.is_same(input.build)) {
        return Decision::Promote;
    }

    let effective_max = strategy.effective_max(max_running);
    if capacity(running.len(), effective_max) == 0 {
        Decision::Defer(DeferReason::CapacityExhausted {
            running: running.len(),
            max_running: effective_max,
        })
    } else {
        Decision::Defer(DeferReason::NotSelected { strategy })
    }
}

fn decide_running(input: &AdmissionInput<'_>) -> Decision {
    match input.outcome {
        Some(BuildOutcome::Succeeded { image }) => {
            return Decision::Finish {
                phase: BuildPhase::Succeeded,
                message: None,
                image: image.clone(),
            }
        }
        Some(BuildOutcome::Failed { message }) => {
            return Decision::Finish {
                phase: BuildPhase::Failed,
                message: Some(message.clone()),
                image: None,
            }
        }
        Some(BuildOutcome::Interrupted { message }) => {
            return Decision::Finish {
                phase: BuildPhase::Interrupted,
                message: Some(message.clone()),
                image: None,
            }
        }
        Some(BuildOutcome::NotFound) => {
            return Decision::Finish {
                phase: BuildPhase::Interrupted,
                message: Some("Pod deleted".to_string()),
                image: None,
            }
        }
        Some(BuildOutcome::Running) | None => {}
    }

    if timed_out(input.build, input.now) {
        return Decision::Interrupt {
            message: "Build timeout".to_string(),
        };
    }

    Decision::Unchanged
}

/// Whether a running build has outlived its timeout.
#[must_use]
pub fn timed_out(build: &BuildRequest, now: DateTime<Utc>) -> bool {
    let started = build.started_at.unwrap_or(build.created_at);
    let Ok(elapsed) = (now - started).to_std() else {
        return false;
    };
    elapsed > build.timeout
}

/// Time left before a running build times out.
#[must_use]
pub fn remaining_time(build: &BuildRequest, now: DateTime<Utc>) -> Duration {
    let started = build.started_at.unwrap_or(build.created_at);
    let elapsed = (now - started).to_std().unwrap_or_default();
    build.timeout.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{
        BuildConfiguration, IntegrationPlatformSpec, IntegrationPlatformStatus, PlatformBuildSpec,
    };
    use crate::tasks::build::queue::tests::request;

    fn ready(strategy: OrderStrategy, max_running: i32) -> PlatformGate {
        PlatformGate::Ready {
            name: "camel-k".to_string(),
            strategy: Ok(strategy),
            max_running,
            timeout: None,
        }
    }

    fn decide_for(
        build: &BuildRequest,
        queue: &BuildQueue,
        platform: &PlatformGate,
        outcome: Option<&BuildOutcome>,
    ) -> Decision {
        decide(&AdmissionInput {
            build,
            queue,
            platform,
            outcome,
            now: build.created_at + chrono::Duration::seconds(60),
        })
    }

    #[test]
    fn new_builds_move_through_scheduling_to_pending() {
        let queue = BuildQueue::default();
        let gate = ready(OrderStrategy::Fifo, 1);
        let new = request("a", BuildPhase::None, 0, &[]);
        assert_eq!(decide_for(&new, &queue, &gate, None), Decision::Schedule);
        let scheduling = request("a", BuildPhase::Scheduling, 0, &[]);
        assert_eq!(
            decide_for(&scheduling, &queue, &PlatformGate::Missing, None),
            Decision::Enqueue
        );
    }

    #[test]
    fn pending_waits_for_a_ready_platform() {
        let build = request("a", BuildPhase::Pending, 0, &[]);
        let queue = BuildQueue::new(vec![build.clone()]);

        assert_eq!(
            decide_for(&build, &queue, &PlatformGate::Missing, None),
            Decision::Defer(DeferReason::PlatformMissing)
        );
        let creating = PlatformGate::NotReady {
            name: "camel-k".to_string(),
            phase: PlatformPhase::Creating,
        };
        assert!(matches!(
            decide_for(&build, &queue, &creating, None),
            Decision::Defer(DeferReason::PlatformNotReady { .. })
        ));
    }

    #[test]
    fn configuration_errors_block_admission() {
        let build = request("a", BuildPhase::Pending, 0, &[]);
        let queue = BuildQueue::new(vec![build.clone()]);

        let unknown = PlatformGate::Ready {
            name: "camel-k".to_string(),
            strategy: Err(ConfigurationError::UnknownOrderStrategy("lifo".to_string())),
            max_running: 3,
            timeout: None,
        };
        assert!(matches!(
            decide_for(&build, &queue, &unknown, None),
            Decision::Defer(DeferReason::Configuration(_))
        ));

        assert_eq!(
            decide_for(&build, &queue, &ready(OrderStrategy::Fifo, 0), None),
            Decision::Defer(DeferReason::Configuration(
                ConfigurationError::NonPositiveMaxRunningBuilds(0)
            ))
        );
    }

    #[test]
    fn fifo_promotes_only_the_oldest_when_one_slot_is_free() {
        let older = request("b1", BuildPhase::Pending, 0, &["camel:timer"]);
        let newer = request("b2", BuildPhase::Pending, 10, &["camel:kafka"]);
        let running = request("r", BuildPhase::Running, -10, &[]);
        let queue = BuildQueue::new(vec![newer.clone(), older.clone(), running]);
        let gate = ready(OrderStrategy::Fifo, 2);

        assert_eq!(decide_for(&older, &queue, &gate, None), Decision::Promote);
        assert_eq!(
            decide_for(&newer, &queue, &gate, None),
            Decision::Defer(DeferReason::NotSelected {
                strategy: OrderStrategy::Fifo
            })
        );
    }

    #[test]
    fn full_capacity_defers_with_counts() {
        let build = request("p", BuildPhase::Pending, 5, &[]);
        let queue = BuildQueue::new(vec![
            request("r1", BuildPhase::Running, 0, &[]),
            request("r2", BuildPhase::Running, 1, &[]),
            build.clone(),
        ]);
        let decision = decide_for(&build, &queue, &ready(OrderStrategy::Fifo, 2), None);
        assert_eq!(
            decision,
            Decision::Defer(DeferReason::CapacityExhausted {
                running: 2,
                max_running: 2
            })
        );
        if let Decision::Defer(reason) = decision {
            assert_eq!(reason.message(), "waiting for a free build slot (2/2 running)");
        }
    }

    #[test]
    fn sequential_reports_effective_limit() {
        let build = request("p", BuildPhase::Pending, 5, &[]);
        let queue = BuildQueue::new(vec![request("r1", BuildPhase::Running, 0, &[]), build.clone()]);
        assert_eq!(
            decide_for(&build, &queue, &ready(OrderStrategy::Sequential, 2), None),
            Decision::Defer(DeferReason::CapacityExhausted {
                running: 1,
                max_running: 1
            })
        );
    }

    #[test]
    fn running_builds_follow_the_builder() {
        let mut build = request("a", BuildPhase::Running, 0, &[]);
        build.started_at = Some(build.created_at);
        let queue = BuildQueue::new(vec![build.clone()]);
        let gate = ready(OrderStrategy::Fifo, 1);

        assert_eq!(
            decide_for(&build, &queue, &gate, Some(&BuildOutcome::Running)),
            Decision::Unchanged
        );
        assert_eq!(
            decide_for(
                &build,
                &queue,
                &gate,
                Some(&BuildOutcome::Failed {
                    message: "boom".into()
                })
            ),
            Decision::Finish {
                phase: BuildPhase::Failed,
                message: Some("boom".to_string()),
                image: None
            }
        );
        assert_eq!(
            decide_for(&build, &queue, &gate, Some(&BuildOutcome::NotFound)),
            Decision::Finish {
                phase: BuildPhase::Interrupted,
                message: Some("Pod deleted".to_string()),
                image: None
            }
        );
    }

    #[test]
    fn expired_builds_are_interrupted_unless_already_finished() {
        let mut build = request("a", BuildPhase::Running, 0, &[]);
        build.started_at = Some(build.created_at);
        build.timeout = Duration::from_secs(30);
        let queue = BuildQueue::new(vec![build.clone()]);
        let gate = ready(OrderStrategy::Fifo, 1);

        assert_eq!(
            decide_for(&build, &queue, &gate, Some(&BuildOutcome::Running)),
            Decision::Interrupt {
                message: "Build timeout".to_string()
            }
        );
        assert!(matches!(
            decide_for(
                &build,
                &queue,
                &gate,
                Some(&BuildOutcome::Succeeded { image: None })
            ),
            Decision::Finish {
                phase: BuildPhase::Succeeded,
                ..
            }
        ));
    }

    #[test]
    fn terminal_builds_are_left_alone() {
        let queue = BuildQueue::default();
        let gate = ready(OrderStrategy::Fifo, 1);
        for phase in [
            BuildPhase::Succeeded,
            BuildPhase::Failed,
            BuildPhase::Error,
            BuildPhase::Interrupted,
        ] {
            let build = request("a", phase, 0, &[]);
            assert_eq!(decide_for(&build, &queue, &gate, None), Decision::Unchanged);
        }
    }

    #[test]
    fn remaining_time_counts_down_from_start() {
        let mut build = request("a", BuildPhase::Running, 0, &[]);
        build.started_at = Some(build.created_at);
        build.timeout = Duration::from_secs(300);
        let now = build.created_at + chrono::Duration::seconds(120);
        assert_eq!(remaining_time(&build, now), Duration::from_secs(180));
        assert!(!timed_out(&build, now));
    }

    #[test]
    fn gate_reads_resolved_status_only() {
        let mut platform = IntegrationPlatform::new(
            "camel-k",
            IntegrationPlatformSpec {
                build: PlatformBuildSpec {
                    max_running_builds: Some(99),
                    ..Default::default()
                },
            },
        );
        assert!(matches!(
            PlatformGate::from_platform(Some(&platform)),
            PlatformGate::NotReady { .. }
        ));

        platform.status = Some(IntegrationPlatformStatus {
            phase: PlatformPhase::Ready,
            build: PlatformBuildSpec {
                max_running_builds: Some(2),
                timeout: Some("90s".to_string()),
                build_configuration: BuildConfiguration {
                    order_strategy: Some("Dependencies".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(
            PlatformGate::from_platform(Some(&platform)),
            PlatformGate::Ready {
                name: "camel-k".to_string(),
                strategy: Ok(OrderStrategy::Dependencies),
                max_running: 2,
                timeout: Some(Duration::from_secs(90)),
            }
        );
    }
}
