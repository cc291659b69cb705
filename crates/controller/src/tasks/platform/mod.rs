//! IntegrationPlatform lifecycle: lookup for builds, default resolution and
//! the phase machine that keeps the platform Ready.

pub mod actions;
pub mod controller;
pub mod lookup;
pub mod resolve;

pub use controller::{error_policy_platform, platforms_for_catalog, reconcile_platform};
pub use lookup::{find_platform, select_platform};
pub use resolve::{evaluate_monitor, resolve_build_spec, validate_build_spec};
