#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(unreachable_pub)]

//! Core pipeline for the Castle workload orchestrator.
//!
//! This crate turns the declarative catalog (`castle.yaml`) into a
//! node-local registry of fully-resolved deployments and projects that
//! registry onto the operating system:
//!
//! ```text
//! castle.yaml ──load──▶ CastleConfig ──compile──▶ NodeRegistry
//!                                                    │
//!                       ~/.config/systemd/user/ ◀────┤ generators
//!                       ~/.castle/generated/    ◀────┘
//! ```
//!
//! The catalog describes *what exists* (programs) and *how it runs*
//! (services, jobs). The registry records *what is deployed here*, with
//! every command line, environment variable, and port resolved so the
//! generated artifacts never reference the source tree.

/// Catalog load, save, and cross-entity validation.
pub mod catalog;
/// Registry compilation — resolving specs into deployed components.
pub mod compile;
/// Core error types.
pub mod error;
/// Systemd unit and gateway config generation.
pub mod generators;
/// The `~/.castle` directory layout.
pub mod home;
/// Declarative spec types for programs, services, and jobs.
pub mod manifest;
/// Node registry types and persistence.
pub mod registry;
/// Secret storage and `${secret:NAME}` resolution.
pub mod secrets;

pub use catalog::{CastleConfig, GatewayConfig, find_castle_root};
pub use compile::{compile, compile_component};
pub use error::{CastleError, CastleResult};
pub use home::CastleHome;
pub use manifest::{JobSpec, ProgramSpec, RunSpec, ServiceSpec};
pub use registry::{Behavior, DeployedComponent, NodeConfig, NodeRegistry, Runner};
