pub mod admission;
pub mod builder;
pub mod controller;
pub mod queue;
pub mod strategy;

pub use admission::{decide, AdmissionInput, Decision, DeferReason, PlatformGate};
pub use builder::{BuildOutcome, Builder, BuilderError, PodBuilder};
pub use controller::{admit_build, error_policy_build, reconcile_build, AdmissionPass};
pub use queue::{BuildQueue, BuildRequest};
pub use strategy::{ConfigurationError, OrderStrategy};
