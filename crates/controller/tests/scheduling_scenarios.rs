//! End-to-end scheduling scenarios.
//!
//! Each pass reconciles every build once against a fresh snapshot of the
//! cluster, the way the Build controller does, with an in-memory builder in
//! place of pods.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use controller::crds::{Build, BuildPhase, BuildSpec};
use controller::tasks::build::{
    admit_build, AdmissionPass, BuildOutcome, BuildQueue, BuildRequest, Builder, BuilderError,
    OrderStrategy, PlatformGate,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

// =============================================================================
// In-memory builder
// =============================================================================

#[derive(Default)]
struct FakeBuilder {
    started: Mutex<Vec<String>>,
    cancelled: Mutex<BTreeSet<String>>,
    outcomes: Mutex<BTreeMap<String, BuildOutcome>>,
}

impl FakeBuilder {
    fn finish(&self, name: &str) {
        self.outcomes.lock().unwrap().insert(
            name.to_string(),
            BuildOutcome::Succeeded {
                image: Some(format!("registry/{name}:latest")),
            },
        );
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Builder for FakeBuilder {
    async fn start_build(&self, build: &Build) -> Result<(), BuilderError> {
        let mut started = self.started.lock().unwrap();
        let name = build.name_any();
        if !started.contains(&name) {
            started.push(name);
        }
        Ok(())
    }

    async fn cancel_build(&self, build: &Build) -> Result<(), BuilderError> {
        self.cancelled.lock().unwrap().insert(build.name_any());
        Ok(())
    }

    async fn build_status(&self, build: &Build) -> Result<BuildOutcome, BuilderError> {
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .get(&build.name_any())
            .cloned()
            .unwrap_or(BuildOutcome::Running))
    }
}

// =============================================================================
// Cluster simulation
// =============================================================================

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

fn build(name: &str, created_offset_secs: i64, deps: &[&str]) -> Build {
    let mut build = Build::new(
        name,
        BuildSpec {
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
            ..Default::default()
        },
    );
    build.metadata.namespace = Some("default".to_string());
    build.metadata.creation_timestamp =
        Some(Time(epoch() + ChronoDuration::seconds(created_offset_secs)));
    build
}

struct Cluster {
    builds: Vec<Build>,
    builder: FakeBuilder,
    gate: PlatformGate,
    max_running_seen: usize,
}

impl Cluster {
    fn new(strategy: OrderStrategy, max_running: i32, builds: Vec<Build>) -> Self {
        Self {
            builds,
            builder: FakeBuilder::default(),
            gate: PlatformGate::Ready {
                name: "camel-k".to_string(),
                strategy: Ok(strategy),
                max_running,
                timeout: None,
            },
            max_running_seen: 0,
        }
    }

    fn snapshot(&self) -> BuildQueue {
        BuildQueue::new(
            self.builds
                .iter()
                .map(|b| BuildRequest::from_build(b, DEFAULT_TIMEOUT))
                .collect(),
        )
    }

    /// Reconcile every build once, in the given order.
    async fn pass_in_order(&mut self, order: &[&str], now: DateTime<Utc>) -> usize {
        let mut writes = 0;
        for name in order {
            let Some(index) = self.builds.iter().position(|b| b.name_any() == *name) else {
                continue;
            };
            let queue = self.snapshot();
            let current = self.builds[index].clone();
            let AdmissionPass { desired, .. } = admit_build(
                &current,
                &queue,
                &self.gate,
                DEFAULT_TIMEOUT,
                &self.builder,
                now,
            )
            .await
            .unwrap();

            if let Some(status) = desired {
                if current.status.as_ref() != Some(&status) {
                    self.builds[index].status = Some(status);
                    writes += 1;
                }
            }

            let running = self.phases_of(BuildPhase::Running).len();
            self.max_running_seen = self.max_running_seen.max(running);
        }
        writes
    }

    async fn pass(&mut self, now: DateTime<Utc>) -> usize {
        let order: Vec<String> = self.builds.iter().map(|b| b.name_any()).collect();
        let order: Vec<&str> = order.iter().map(String::as_str).collect();
        self.pass_in_order(&order, now).await
    }

    /// Run passes until nothing changes.
    async fn settle(&mut self, now: DateTime<Utc>) {
        for _ in 0..10 {
            if self.pass(now).await == 0 {
                return;
            }
        }
        panic!("cluster did not settle");
    }

    fn phases_of(&self, phase: BuildPhase) -> Vec<String> {
        self.builds
            .iter()
            .filter(|b| b.phase() == phase)
            .map(|b| b.name_any())
            .collect()
    }

    fn phase(&self, name: &str) -> BuildPhase {
        self.builds
            .iter()
            .find(|b| b.name_any() == name)
            .map(Build::phase)
            .unwrap()
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn sequential_runs_one_build_at_a_time_in_creation_order() {
    let mut cluster = Cluster::new(
        OrderStrategy::Sequential,
        3,
        vec![
            build("third", 30, &["camel:log"]),
            build("first", 10, &["camel:timer"]),
            build("second", 20, &["camel:cron"]),
        ],
    );
    let now = epoch() + ChronoDuration::minutes(1);

    cluster.settle(now).await;
    assert_eq!(cluster.phases_of(BuildPhase::Running), vec!["first"]);

    for expected in ["second", "third"] {
        let finished = cluster.phases_of(BuildPhase::Running);
        for name in &finished {
            cluster.builder.finish(name);
        }
        cluster.settle(now).await;
        assert_eq!(cluster.phases_of(BuildPhase::Running), vec![expected]);
    }

    assert_eq!(cluster.builder.started(), vec!["first", "second", "third"]);
    assert_eq!(cluster.max_running_seen, 1);
}

#[tokio::test]
async fn fifo_fills_every_slot_and_backfills_in_age_order() {
    let mut cluster = Cluster::new(
        OrderStrategy::Fifo,
        2,
        vec![
            build("a", 1, &["camel:timer"]),
            build("b", 2, &["camel:timer"]),
            build("c", 3, &["camel:log"]),
            build("d", 4, &["camel:cron"]),
        ],
    );
    let now = epoch() + ChronoDuration::minutes(1);

    cluster.settle(now).await;
    assert_eq!(cluster.phases_of(BuildPhase::Running), vec!["a", "b"]);
    assert_eq!(cluster.phase("c"), BuildPhase::Pending);

    cluster.builder.finish("b");
    cluster.settle(now).await;
    assert_eq!(cluster.phase("b"), BuildPhase::Succeeded);
    assert_eq!(cluster.phases_of(BuildPhase::Running), vec!["a", "c"]);
    assert_eq!(cluster.max_running_seen, 2);
}

#[tokio::test]
async fn dependencies_promote_the_builds_sharing_the_most() {
    let mut cluster = Cluster::new(
        OrderStrategy::Dependencies,
        2,
        vec![
            build("A", 1, &["camel:timer", "camel:log"]),
            build("B", 2, &["camel:cron", "camel:log", "camel:joor"]),
            build("C", 3, &["camel:timer", "camel:log", "camel:joor", "camel:http"]),
        ],
    );
    let now = epoch() + ChronoDuration::minutes(1);

    // bring everything to Pending before any admission happens
    cluster.pass(now).await;
    cluster.pass(now).await;
    assert_eq!(cluster.phases_of(BuildPhase::Pending), vec!["A", "B", "C"]);

    // B is looked at before C, and must still lose its slot to C
    cluster.pass_in_order(&["A", "B", "C"], now).await;
    assert_eq!(cluster.phases_of(BuildPhase::Running), vec!["A", "C"]);
    assert_eq!(cluster.phase("B"), BuildPhase::Pending);
}

#[tokio::test]
async fn dependencies_admit_independent_builds_that_arrive_alone() {
    let mut cluster = Cluster::new(
        OrderStrategy::Dependencies,
        2,
        vec![
            build("A", 1, &["camel:timer", "camel:log"]),
            build("B", 2, &["camel:cron", "camel:log", "camel:joor"]),
        ],
    );
    let now = epoch() + ChronoDuration::minutes(1);

    cluster.settle(now).await;
    assert_eq!(cluster.phases_of(BuildPhase::Running), vec!["A", "B"]);

    cluster
        .builds
        .push(build("C", 3, &["camel:timer", "camel:log", "camel:joor", "camel:http"]));
    cluster.settle(now).await;
    assert_eq!(cluster.phase("C"), BuildPhase::Pending);
}

#[tokio::test]
async fn dependencies_keep_a_started_batch_together_across_passes() {
    for order in [["XY", "AB", "ABC"], ["ABC", "AB", "XY"]] {
        let mut cluster = Cluster::new(
            OrderStrategy::Dependencies,
            2,
            vec![
                build("XY", 1, &["camel:kafka", "camel:jms"]),
                build("AB", 2, &["camel:timer", "camel:log"]),
                build("ABC", 3, &["camel:timer", "camel:log", "camel:http"]),
            ],
        );
        let now = epoch() + ChronoDuration::minutes(1);

        cluster.pass(now).await;
        cluster.pass(now).await;
        assert_eq!(cluster.phases_of(BuildPhase::Pending), vec!["XY", "AB", "ABC"]);

        cluster.pass_in_order(&order, now).await;
        cluster.settle(now).await;
        assert_eq!(
            cluster.phases_of(BuildPhase::Running),
            vec!["AB", "ABC"],
            "reconcile order {order:?}"
        );
        assert_eq!(cluster.phase("XY"), BuildPhase::Pending);
    }
}

#[tokio::test]
async fn repeated_passes_do_not_rewrite_settled_builds() {
    let mut cluster = Cluster::new(
        OrderStrategy::Fifo,
        1,
        vec![build("a", 1, &["camel:timer"]), build("b", 2, &["camel:log"])],
    );
    let now = epoch() + ChronoDuration::minutes(1);

    cluster.settle(now).await;
    let before: Vec<_> = cluster.builds.iter().map(|b| b.status.clone()).collect();

    assert_eq!(cluster.pass(now).await, 0);
    let after: Vec<_> = cluster.builds.iter().map(|b| b.status.clone()).collect();
    assert_eq!(before, after);
    assert_eq!(cluster.builder.started(), vec!["a"]);
}

#[tokio::test]
async fn a_timed_out_build_frees_its_slot() {
    let mut cluster = Cluster::new(
        OrderStrategy::Fifo,
        1,
        vec![build("slow", 1, &["camel:timer"]), build("next", 2, &["camel:log"])],
    );
    let start = epoch() + ChronoDuration::minutes(1);

    cluster.settle(start).await;
    assert_eq!(cluster.phases_of(BuildPhase::Running), vec!["slow"]);

    let later = start + ChronoDuration::minutes(6);
    cluster.settle(later).await;

    assert_eq!(cluster.phase("slow"), BuildPhase::Interrupted);
    assert!(cluster.builder.cancelled.lock().unwrap().contains("slow"));
    assert_eq!(cluster.phases_of(BuildPhase::Running), vec!["next"]);
    assert_eq!(cluster.max_running_seen, 1);
}

#[tokio::test]
async fn nothing_is_admitted_while_the_platform_is_not_ready() {
    let mut cluster = Cluster::new(OrderStrategy::Fifo, 2, vec![build("a", 1, &["camel:timer"])]);
    cluster.gate = PlatformGate::Missing;
    let now = epoch() + ChronoDuration::minutes(1);

    cluster.settle(now).await;
    assert_eq!(cluster.phase("a"), BuildPhase::Pending);
    assert!(cluster.builder.started().is_empty());
    let message = cluster.builds[0]
        .status
        .as_ref()
        .and_then(|s| s.message.clone())
        .unwrap();
    assert!(message.contains("integration platform"));
}
