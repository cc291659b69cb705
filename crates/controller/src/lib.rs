/*
 * Camel K Build Operator - build scheduling for Kubernetes integrations
 * Copyright (C) 2025 Camel K build team
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Build operator core library
//!
//! Custom resources for builds, platforms and catalogs, the admission logic
//! that decides which builds may run, and the controllers driving both.

pub mod crds;
pub mod tasks;

// Re-export commonly used types
pub use crds::{Build, BuildPhase, BuildSpec, BuildStatus, IntegrationPlatform};
pub use tasks::build::{decide, OrderStrategy};
pub use tasks::config::ControllerConfig;
