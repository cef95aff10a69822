//! `rigup-runtime` – reconcilers and the orchestrator
//!
//! # Modules
//!
//! - [`reconciler`] – one convergence routine per resource kind, each walking
//!   the `Unknown → Probed → {Satisfied | NeedsAction} → {Converged | Failed}`
//!   lifecycle.  Every action goes through
//!   [`VerifiedExecutor`][rigup_kernel::VerifiedExecutor] and is judged by a
//!   fresh probe, not by its exit code.
//! - [`orchestrator`] – [`Orchestrator`][orchestrator::Orchestrator]: validates
//!   the run, then drives the reconcilers in dependency order, fail-fast.
//! - [`report`] – [`RunReport`][report::RunReport]: what each step did,
//!   persisted as JSON after every run.

pub mod orchestrator;
pub mod reconciler;
pub mod report;

pub use orchestrator::{
    Collaborators, ConfigFileSpec, LimitsSpec, Orchestrator, Plan, RunOptions, ServiceSpec, Step, TaskNames, ToolNames,
};
pub use reconciler::{FileTemplate, Phase, Readiness, TemplateSource};
pub use report::{RunReport, StepRecord, StepStatus};
