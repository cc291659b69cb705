//! Build ordering strategies.
//!
//! Each strategy is a pure selection over the pending list: given the builds
//! already running and the platform limit, return the builds to promote in
//! this pass. Nothing here talks to the cluster.

use super::queue::BuildRequest;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown build order strategy {0:?} (expected one of: sequential, fifo, dependencies)")]
    UnknownOrderStrategy(String),

    #[error("maxRunningBuilds must be greater than zero, got {0}")]
    NonPositiveMaxRunningBuilds(i32),

    #[error("invalid build timeout {0:?}")]
    InvalidTimeout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderStrategy {
    Fifo,
    #[default]
    Sequential,
    Dependencies,
}

impl FromStr for OrderStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(OrderStrategy::Fifo),
            "sequential" => Ok(OrderStrategy::Sequential),
            "dependencies" => Ok(OrderStrategy::Dependencies),
            _ => Err(ConfigurationError::UnknownOrderStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for OrderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStrategy::Fifo => "fifo",
            OrderStrategy::Sequential => "sequential",
            OrderStrategy::Dependencies => "dependencies",
        };
        f.write_str(s)
    }
}

impl OrderStrategy {
    /// Concurrency actually enforced for a configured limit.
    #[must_use]
    pub fn effective_max(self, max_running: i32) -> i32 {
        match self {
            OrderStrategy::Sequential => max_running.min(1),
            OrderStrategy::Fifo | OrderStrategy::Dependencies => max_running,
        }
    }

    /// Pick the builds to promote now. `pending` must be sorted oldest first.
    #[must_use]
    pub fn select_next(
        self,
        pending: &[BuildRequest],
        running: &[BuildRequest],
        max_running: i32,
    ) -> Vec<BuildRequest> {
        let capacity = capacity(running.len(), self.effective_max(max_running));
        if capacity == 0 || pending.is_empty() {
            return Vec::new();
        }

        match self {
            OrderStrategy::Fifo | OrderStrategy::Sequential => {
                pending.iter().take(capacity).cloned().collect()
            }
            OrderStrategy::Dependencies => {
                let warm: BTreeSet<String> = running
                    .iter()
                    .flat_map(|b| b.dependencies.iter().cloned())
                    .collect();
                select_by_affinity(pending, &warm, capacity)
            }
        }
    }
}

/// Free slots; zero when building is paused or the limit is reached.
#[must_use]
pub fn capacity(running: usize, max_running: i32) -> usize {
    let Ok(max) = usize::try_from(max_running) else {
        return 0;
    };
    max.saturating_sub(running)
}

/// Group builds whose dependency sets intersect, transitively.
///
/// Returns clusters of indexes into `pending`; each cluster keeps the input
/// order, so its first member is its oldest build.
#[must_use]
pub fn overlap_clusters(pending: &[BuildRequest]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..pending.len()).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..pending.len() {
        for j in (i + 1)..pending.len() {
            if pending[i].overlap(&pending[j].dependencies) > 0 {
                let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                if a != b {
                    parent[b.max(a)] = a.min(b);
                }
            }
        }
    }

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut cluster_of_root: Vec<Option<usize>> = vec![None; pending.len()];
    for i in 0..pending.len() {
        let r = root(&mut parent, i);
        match cluster_of_root[r] {
            Some(c) => clusters[c].push(i),
            None => {
                cluster_of_root[r] = Some(clusters.len());
                clusters.push(vec![i]);
            }
        }
    }
    clusters
}

fn select_by_affinity(
    pending: &[BuildRequest],
    warm: &BTreeSet<String>,
    capacity: usize,
) -> Vec<BuildRequest> {
    let mut clusters = overlap_clusters(pending);
    let mut remaining = capacity;
    let mut selected = Vec::with_capacity(capacity);

    while remaining > 0 && !clusters.is_empty() {
        // a cluster continuing a running batch first, then the largest
        // promotable batch, oldest member breaks ties
        let Some(best) = clusters
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                touches(pending, a, warm)
                    .cmp(&touches(pending, b, warm))
                    .then_with(|| a.len().min(remaining).cmp(&b.len().min(remaining)))
                    .then_with(|| b[0].cmp(&a[0]))
            })
            .map(|(i, _)| i)
        else {
            break;
        };

        let cluster = clusters.swap_remove(best);
        let batch = batch_from_cluster(pending, &cluster, warm, remaining);
        remaining -= batch.len();
        selected.extend(batch.into_iter().map(|i| pending[i].clone()));
    }

    selected
}

fn touches(pending: &[BuildRequest], cluster: &[usize], warm: &BTreeSet<String>) -> bool {
    cluster.iter().any(|&i| pending[i].overlap(warm) > 0)
}

/// Greedily add whoever shares the most dependencies with what is already
/// running or chosen; the oldest wins a tie, so a cold start seeds with the
/// oldest member.
fn batch_from_cluster(
    pending: &[BuildRequest],
    cluster: &[usize],
    warm: &BTreeSet<String>,
    limit: usize,
) -> Vec<usize> {
    let mut candidates: Vec<usize> = cluster.to_vec();
    let mut batch = Vec::new();
    let mut union: BTreeSet<String> = warm.clone();

    while batch.len() < limit && !candidates.is_empty() {
        let pick = candidates
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                pending[**a]
                    .overlap(&union)
                    .cmp(&pending[**b].overlap(&union))
                    .then_with(|| b.cmp(a))
            })
            .map_or(0, |(pos, _)| pos);

        let chosen = candidates.remove(pick);
        union.extend(pending[chosen].dependencies.iter().cloned());
        batch.push(chosen);
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::BuildPhase;
    use crate::tasks::build::queue::tests::request;

    fn pending(specs: &[(&str, &[&str])]) -> Vec<BuildRequest> {
        specs
            .iter()
            .enumerate()
            .map(|(i, (name, deps))| {
                request(name, BuildPhase::Pending, i64::try_from(i).unwrap(), deps)
            })
            .collect()
    }

    fn running(count: usize) -> Vec<BuildRequest> {
        (0..count)
            .map(|i| request(&format!("r{i}"), BuildPhase::Running, -100, &[]))
            .collect()
    }

    fn names(selected: &[BuildRequest]) -> Vec<&str> {
        selected.iter().map(|b| b.name.as_str()).collect()
    }

    #[test]
    fn parses_strategy_names_case_insensitively() {
        assert_eq!("FIFO".parse::<OrderStrategy>().unwrap(), OrderStrategy::Fifo);
        assert_eq!(
            "Sequential".parse::<OrderStrategy>().unwrap(),
            OrderStrategy::Sequential
        );
        assert_eq!(
            "dependencies".parse::<OrderStrategy>().unwrap(),
            OrderStrategy::Dependencies
        );
        assert_eq!(
            "lifo".parse::<OrderStrategy>().unwrap_err(),
            ConfigurationError::UnknownOrderStrategy("lifo".to_string())
        );
    }

    #[test]
    fn no_capacity_means_no_selection() {
        let builds = pending(&[("a", &[]), ("b", &[])]);
        for strategy in [
            OrderStrategy::Fifo,
            OrderStrategy::Sequential,
            OrderStrategy::Dependencies,
        ] {
            assert!(strategy.select_next(&builds, &running(0), 0).is_empty());
            assert!(strategy.select_next(&builds, &running(0), -3).is_empty());
            assert!(strategy.select_next(&builds, &running(2), 2).is_empty());
            assert!(strategy.select_next(&builds, &running(5), 2).is_empty());
        }
    }

    #[test]
    fn fifo_takes_oldest_up_to_capacity() {
        let builds = pending(&[("a", &[]), ("b", &[]), ("c", &[])]);
        let fresh = OrderStrategy::Fifo.select_next(&builds, &running(0), 2);
        assert_eq!(names(&fresh), vec!["a", "b"]);
        let busy = OrderStrategy::Fifo.select_next(&builds, &running(1), 2);
        assert_eq!(names(&busy), vec!["a"]);
    }

    #[test]
    fn sequential_caps_concurrency_at_one() {
        let builds = pending(&[("a", &[]), ("b", &[]), ("c", &[])]);
        let selected = OrderStrategy::Sequential.select_next(&builds, &running(0), 2);
        assert_eq!(names(&selected), vec!["a"]);
        assert!(OrderStrategy::Sequential.select_next(&builds, &running(1), 2).is_empty());
        assert_eq!(OrderStrategy::Sequential.effective_max(5), 1);
        assert_eq!(OrderStrategy::Sequential.effective_max(0), 0);
    }

    #[test]
    fn clusters_follow_transitive_overlap() {
        let builds = pending(&[
            ("a", &["x"]),
            ("b", &["q"]),
            ("c", &["x", "y"]),
            ("d", &["y", "z"]),
            ("e", &[]),
        ]);
        let clusters = overlap_clusters(&builds);
        assert_eq!(clusters, vec![vec![0, 2, 3], vec![1], vec![4]]);
    }

    #[test]
    fn dependencies_prefer_the_largest_cluster() {
        let builds = pending(&[
            ("xy", &["X", "Y"]),
            ("ab", &["A", "B"]),
            ("abc", &["A", "B", "C"]),
        ]);
        let selected = OrderStrategy::Dependencies.select_next(&builds, &running(0), 2);
        assert_eq!(names(&selected), vec!["ab", "abc"]);
    }

    #[test]
    fn dependencies_break_cluster_ties_by_age() {
        let builds = pending(&[("old", &["a"]), ("new", &["b"])]);
        let selected = OrderStrategy::Dependencies.select_next(&builds, &running(0), 1);
        assert_eq!(names(&selected), vec!["old"]);
    }

    #[test]
    fn dependencies_batch_by_overlap_within_a_cluster() {
        let builds = pending(&[
            ("A", &["camel:timer", "camel:log"]),
            ("B", &["camel:cron", "camel:log", "camel:joor"]),
            ("C", &["camel:timer", "camel:log", "camel:joor", "camel:http"]),
        ]);
        let selected = OrderStrategy::Dependencies.select_next(&builds, &running(0), 2);
        assert_eq!(names(&selected), vec!["A", "C"]);
    }

    #[test]
    fn dependencies_favour_builds_sharing_with_running_ones() {
        let builds = pending(&[
            ("B", &["camel:cron", "camel:log", "camel:joor"]),
            ("C", &["camel:timer", "camel:log", "camel:joor", "camel:http"]),
        ]);
        let running = vec![request(
            "A",
            BuildPhase::Running,
            -1,
            &["camel:timer", "camel:log"],
        )];
        let selected = OrderStrategy::Dependencies.select_next(&builds, &running, 2);
        assert_eq!(names(&selected), vec!["C"]);
    }

    #[test]
    fn dependencies_finish_a_batch_before_starting_an_older_cluster() {
        let builds = pending(&[("xy", &["X", "Y"]), ("abc", &["A", "B", "C"])]);
        let running = vec![request("ab", BuildPhase::Running, -1, &["A", "B"])];
        let selected = OrderStrategy::Dependencies.select_next(&builds, &running, 2);
        assert_eq!(names(&selected), vec!["abc"]);

        let unrelated = vec![request("kafka", BuildPhase::Running, -1, &["K"])];
        let selected = OrderStrategy::Dependencies.select_next(&builds, &unrelated, 2);
        assert_eq!(names(&selected), vec!["xy"]);
    }

    #[test]
    fn dependencies_spill_leftover_capacity_to_other_clusters() {
        let builds = pending(&[
            ("a", &["camel:timer"]),
            ("b", &["camel:timer"]),
            ("z", &["camel:kafka"]),
        ]);
        let selected = OrderStrategy::Dependencies.select_next(&builds, &running(0), 3);
        assert_eq!(names(&selected), vec!["a", "b", "z"]);
    }
}
