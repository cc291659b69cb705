//! Default resolution and health evaluation for `IntegrationPlatform`.
//!
//! Everything here is pure; the actions feed it cluster observations.

use crate::crds::duration::{format_duration, parse_duration, truncate_to_seconds};
use crate::crds::{
    find_condition, remove_condition, set_condition, BuildConfiguration, IntegrationPlatformStatus,
    PlatformBuildSpec, PlatformPhase, RegistrySpec, CONDITION_BUILD_CACHE_WARMED,
    CONDITION_BUILD_CONFIGURATION_VALID, CONDITION_CATALOG_AVAILABLE,
    CONDITION_REGISTRY_AVAILABLE, CONDITION_SEQUENTIAL_CAPPED,
};
use crate::tasks::build::strategy::{ConfigurationError, OrderStrategy};
use crate::tasks::config::PlatformConfig;
use chrono::{DateTime, Utc};

pub const BUILD_STRATEGY_POD: &str = "pod";
pub const BUILD_STRATEGY_ROUTINE: &str = "routine";

/// Apply operator defaults to the user supplied build settings.
///
/// Global operators build in pods by default, namespaced ones in-process.
/// A timeout that does not parse is kept verbatim so validation can report it.
#[must_use]
pub fn resolve_build_spec(
    spec: &PlatformBuildSpec,
    defaults: &PlatformConfig,
    global_operator: bool,
) -> PlatformBuildSpec {
    let strategy = spec
        .build_configuration
        .strategy
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| {
            if global_operator {
                BUILD_STRATEGY_POD.to_string()
            } else {
                BUILD_STRATEGY_ROUTINE.to_string()
            }
        });

    let max_running_builds = spec.max_running_builds.unwrap_or(if strategy == BUILD_STRATEGY_POD {
        defaults.max_running_builds_pod
    } else {
        defaults.max_running_builds_routine
    });

    let raw_timeout = spec
        .timeout
        .clone()
        .unwrap_or_else(|| defaults.build_timeout.clone());
    let timeout = parse_duration(&raw_timeout)
        .map(|d| format_duration(truncate_to_seconds(d)))
        .unwrap_or(raw_timeout);

    PlatformBuildSpec {
        runtime_version: Some(
            spec.runtime_version
                .clone()
                .unwrap_or_else(|| defaults.runtime_version.clone()),
        ),
        build_configuration: BuildConfiguration {
            strategy: Some(strategy),
            order_strategy: Some(
                spec.build_configuration
                    .order_strategy
                    .clone()
                    .unwrap_or_else(|| defaults.order_strategy.clone()),
            ),
        },
        max_running_builds: Some(max_running_builds),
        timeout: Some(timeout),
        registry: RegistrySpec {
            address: spec
                .registry
                .address
                .clone()
                .filter(|a| !a.trim().is_empty())
                .or_else(|| defaults.registry_address.clone()),
            insecure: spec.registry.insecure,
        },
        build_cache_warming: Some(spec.build_cache_warming.unwrap_or(false)),
        base_image: spec.base_image.clone(),
    }
}

/// Check the settings admission depends on.
pub fn validate_build_spec(
    resolved: &PlatformBuildSpec,
) -> Result<(OrderStrategy, i32), ConfigurationError> {
    let strategy: OrderStrategy = resolved
        .build_configuration
        .order_strategy
        .as_deref()
        .unwrap_or_default()
        .parse()?;

    let max_running = resolved.max_running_builds.unwrap_or(0);
    if max_running <= 0 {
        return Err(ConfigurationError::NonPositiveMaxRunningBuilds(max_running));
    }

    if let Some(timeout) = &resolved.timeout {
        if parse_duration(timeout).map_or(true, |d| d.is_zero()) {
            return Err(ConfigurationError::InvalidTimeout(timeout.clone()));
        }
    }

    Ok((strategy, max_running))
}

/// Cluster facts the monitor cannot derive from the platform itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observations {
    pub catalog_available: bool,
}

/// Re-evaluate a Ready or Error platform and return its new status.
#[must_use]
pub fn evaluate_monitor(
    mut status: IntegrationPlatformStatus,
    observed: Observations,
    now: DateTime<Utc>,
) -> IntegrationPlatformStatus {
    let runtime_version = status.build.runtime_version.clone().unwrap_or_default();
    let mut healthy = true;

    if observed.catalog_available {
        set_condition(
            &mut status.conditions,
            CONDITION_CATALOG_AVAILABLE,
            true,
            "CamelCatalogAvailable",
            format!("camel catalog {runtime_version} available"),
            now,
        );
    } else {
        healthy = false;
        set_condition(
            &mut status.conditions,
            CONDITION_CATALOG_AVAILABLE,
            false,
            "CamelCatalogNotAvailable",
            format!(
                "camel catalog {runtime_version} not available, please review given runtime version"
            ),
            now,
        );
    }

    match status.build.registry.address.clone() {
        Some(address) => set_condition(
            &mut status.conditions,
            CONDITION_REGISTRY_AVAILABLE,
            true,
            "RegistryAvailable",
            format!("registry available at {address}"),
            now,
        ),
        None => {
            healthy = false;
            set_condition(
                &mut status.conditions,
                CONDITION_REGISTRY_AVAILABLE,
                false,
                "RegistryNotAvailable",
                "registry address not available, you need to set one",
                now,
            );
        }
    }

    match validate_build_spec(&status.build) {
        Ok((strategy, max_running)) => {
            set_condition(
                &mut status.conditions,
                CONDITION_BUILD_CONFIGURATION_VALID,
                true,
                "BuildConfigurationValid",
                format!("{strategy} order strategy with up to {max_running} running builds"),
                now,
            );
            if strategy == OrderStrategy::Sequential && max_running > 1 {
                set_condition(
                    &mut status.conditions,
                    CONDITION_SEQUENTIAL_CAPPED,
                    true,
                    "SequentialRunsOneBuild",
                    format!(
                        "sequential order strategy runs one build at a time, maxRunningBuilds={max_running} is capped to 1"
                    ),
                    now,
                );
            } else {
                remove_condition(&mut status.conditions, CONDITION_SEQUENTIAL_CAPPED);
            }
        }
        Err(err) => {
            healthy = false;
            remove_condition(&mut status.conditions, CONDITION_SEQUENTIAL_CAPPED);
            set_condition(
                &mut status.conditions,
                CONDITION_BUILD_CONFIGURATION_VALID,
                false,
                "InvalidBuildConfiguration",
                err.to_string(),
                now,
            );
        }
    }

    // a failed cache warm-up needs a fresh platform to recover
    if find_condition(&status.conditions, CONDITION_BUILD_CACHE_WARMED).is_some_and(|c| c.is_false())
    {
        healthy = false;
    }

    status.phase = if healthy {
        PlatformPhase::Ready
    } else {
        PlatformPhase::Error
    };
    status
}
