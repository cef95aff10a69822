//! `rigup-hal` – external collaborators
//!
//! rigup never reimplements the tools it drives.  Each external capability is
//! a trait here, with a process-backed implementation for real machines and
//! an in-memory one for tests:
//!
//! - [`runner`] – [`CommandRunner`][runner::CommandRunner]: spawns shell
//!   commands and returns the raw [`ActionOutput`][rigup_types::ActionOutput].
//! - [`toolchain`] – [`VersionManager`][toolchain::VersionManager] and
//!   [`PackageManager`][toolchain::PackageManager].
//! - [`container`] – [`ContainerRuntime`][container::ContainerRuntime]
//!   (networks, containers, `exec` for readiness pings).
//! - [`tasks`] – [`TaskRunner`][tasks::TaskRunner] for provisioning, reset and
//!   the long-running dev process.
//! - [`privilege`] – optional [`Escalation`][privilege::Escalation] and the
//!   [`Sysctl`][privilege::Sysctl] reader for kernel limits.
//! - [`sim`] – [`SimWorld`][sim::SimWorld]: simulated collaborators sharing one
//!   recorded world state, for headless tests.

pub mod container;
pub mod privilege;
pub mod runner;
pub mod sim;
pub mod tasks;
pub mod toolchain;

pub use container::{ContainerRuntime, DockerRuntime};
pub use privilege::{Escalation, ProcSysctl, SudoEscalation, Sysctl};
pub use runner::{CommandRunner, CommandTemplate, ShellRunner, shell_quote};
pub use sim::SimWorld;
pub use tasks::{ShellTaskRunner, TaskRunner};
pub use toolchain::{PackageManager, ShellPackageManager, ShellVersionManager, VersionManager};
