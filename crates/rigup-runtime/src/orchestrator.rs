//! [`Orchestrator`] – runs every reconciler in dependency order.
//!
//! A run is:
//!
//! 1. **Validate** – resolve the [`RunMode`] and check the project root
//!    markers.  Either failing is a [`RigError::Configuration`] and no
//!    reconciler runs.
//! 2. **Plan** – [`Plan::steps`] lays out the fixed order: toolchain →
//!    package manager → limits → config files → network → services →
//!    dependencies → one-time reset → final task.
//! 3. **Converge** – each step checks the capabilities it needs, then hands
//!    its [`ManagedResource`] to the matching reconciler.  A failed required
//!    step aborts the run; a failed optional step (limits, by default) is
//!    recorded and the run continues.
//! 4. **Report** – the [`RunReport`] is written to `<state_dir>/last-run.json`.
//!
//! The interrupt flag is checked between steps; a set flag ends the run with
//! [`RigError::Interrupted`].
//!
//! # Example
//!
//! ```rust
//! use rigup_hal::sim::SimWorld;
//! use rigup_kernel::CapabilityManager;
//! use rigup_runtime::{Collaborators, Orchestrator, Plan, RunOptions};
//!
//! let world = SimWorld::new();
//! let dir = std::env::temp_dir().join("rigup-doc-not-a-project");
//! let plan = Plan::new(&dir);
//! let mut orch = Orchestrator::new(plan, Collaborators::simulated(&world, &dir), CapabilityManager::new());
//!
//! // `package.json` is missing, so nothing runs.
//! let report = orch.run(&RunOptions::default());
//! assert!(!report.succeeded());
//! assert_eq!(world.action_count(), 0);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rigup_hal::sim::SimWorld;
use rigup_hal::{ContainerRuntime, Escalation, PackageManager, Sysctl, TaskRunner, VersionManager};
use rigup_kernel::{CapabilityManager, ChangeDetector, FingerprintStore, VerifiedExecutor};
use rigup_types::{
    Capability, ConvergenceOutcome, DesiredState, LimitTarget, ManagedResource, ResourceKind, RigError, RunMode,
};
use tracing::{info, warn};

use crate::reconciler::{
    FileTemplate, Readiness, TemplateSource, reconcile_config_file, reconcile_dependencies, reconcile_limits,
    reconcile_network, reconcile_one_time_task, reconcile_package_manager, reconcile_service,
    reconcile_toolchain, run_foreground_task,
};
use crate::report::{RunReport, StepRecord, StepStatus};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Fingerprint of the last successful dependency install, under the state dir.
pub const FINGERPRINT_FILE: &str = "deps.sha256";
/// Written once the one-time reset task has succeeded.
pub const RESET_MARKER: &str = "reset.done";
pub const REPORT_FILE: &str = "last-run.json";

// ─────────────────────────────────────────────────────────────────────────────
// Plan
// ─────────────────────────────────────────────────────────────────────────────

/// A container service and how long to wait for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub provision_task: String,
    pub health_check: Vec<String>,
    pub readiness: Readiness,
}

/// A configuration file, its template, and required key → default value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFileSpec {
    pub path: PathBuf,
    pub template: PathBuf,
    pub required: BTreeMap<String, String>,
}

/// Kernel limits the dev servers' file watchers need.
///
/// Without privilege escalation an unmet limit is advisory: the run still
/// works, watchers just degrade, so the failure is reported with its `sudo`
/// commands and the run continues.  Set `required` when the project cannot
/// run at all below the targets; the unmet limit then aborts the run.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitsSpec {
    pub targets: Vec<LimitTarget>,
    /// When `false`, unmet limits without escalation are advisory only.
    pub required: bool,
    pub persist_path: PathBuf,
}

impl Default for LimitsSpec {
    fn default() -> Self {
        Self {
            targets: vec![
                LimitTarget::new("fs.inotify.max_user_watches", 524_288),
                LimitTarget::new("fs.inotify.max_user_instances", 512),
            ],
            required: false,
            persist_path: PathBuf::from("/etc/sysctl.d/99-rigup.conf"),
        }
    }
}

/// Task-runner task names.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskNames {
    pub reset: String,
    pub all: String,
    pub server: String,
    pub front: String,
}

impl Default for TaskNames {
    fn default() -> Self {
        Self {
            reset: "db:reset".to_string(),
            all: "dev".to_string(),
            server: "dev:server".to_string(),
            front: "dev:front".to_string(),
        }
    }
}

impl TaskNames {
    pub fn final_task(&self, mode: RunMode) -> &str {
        match mode {
            RunMode::All => &self.all,
            RunMode::ServerOnly => &self.server,
            RunMode::FrontOnly => &self.front,
        }
    }
}

/// Executables each group of steps needs on `PATH`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolNames {
    pub version_manager: String,
    pub package_manager: String,
    pub container_runtime: String,
    pub task_runner: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            version_manager: "fnm".to_string(),
            package_manager: "corepack".to_string(),
            container_runtime: "docker".to_string(),
            task_runner: "task".to_string(),
        }
    }
}

impl ToolNames {
    pub fn all(&self) -> [&str; 4] {
        [
            &self.version_manager,
            &self.package_manager,
            &self.container_runtime,
            &self.task_runner,
        ]
    }
}

/// Everything a run converges, resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub root: PathBuf,
    pub root_markers: Vec<PathBuf>,
    /// Tool-private directory, relative to `root`.
    pub state_dir: PathBuf,
    pub toolchain: String,
    pub toolchain_version: String,
    pub package_manager: String,
    pub package_manager_version: String,
    pub limits: LimitsSpec,
    pub config_files: Vec<ConfigFileSpec>,
    pub network: Option<String>,
    pub services: Vec<ServiceSpec>,
    pub manifest: PathBuf,
    pub install_dir: PathBuf,
    pub tasks: TaskNames,
    pub tools: ToolNames,
}

impl Plan {
    /// A plan with the stock Node.js/pnpm defaults and no services or
    /// configuration files.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            root_markers: vec![PathBuf::from("package.json"), PathBuf::from("Taskfile.yml")],
            state_dir: PathBuf::from(".rigup"),
            toolchain: "node".to_string(),
            toolchain_version: "20.11.1".to_string(),
            package_manager: "pnpm".to_string(),
            package_manager_version: "9.1.0".to_string(),
            limits: LimitsSpec::default(),
            config_files: Vec::new(),
            network: None,
            services: Vec::new(),
            manifest: PathBuf::from("pnpm-lock.yaml"),
            install_dir: PathBuf::from("node_modules"),
            tasks: TaskNames::default(),
            tools: ToolNames::default(),
        }
    }

    pub fn state_path(&self, file: &str) -> PathBuf {
        self.root.join(&self.state_dir).join(file)
    }

    /// Configuration checks that must pass before anything runs.
    pub fn validate(&self, opts: &RunOptions) -> Result<RunMode, RigError> {
        let mode = RunMode::from_flags(opts.server_only, opts.front_only)?;
        let missing: Vec<String> = self
            .root_markers
            .iter()
            .filter(|m| !self.root.join(m).exists())
            .map(|m| m.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(RigError::configuration(format!(
                "{} does not look like the project root (missing {}); run rigup from the repository root",
                self.root.display(),
                missing.join(", ")
            ))
            .with_remedy([r#"cd "$(git rev-parse --show-toplevel)" && rigup"#]));
        }
        Ok(mode)
    }

    /// The ordered steps for one run.
    pub fn steps(&self, opts: &RunOptions, mode: RunMode) -> Vec<Step> {
        let tool = |name: &str| Capability::Tool(name.to_string());
        let mut steps = vec![
            Step::new(
                ResourceKind::ToolchainVersion,
                &self.toolchain,
                DesiredState::ExactVersion(self.toolchain_version.clone()),
            )
            .needs(tool(&self.tools.version_manager)),
            Step::new(
                ResourceKind::PackageManager,
                &self.package_manager,
                DesiredState::ExactVersion(self.package_manager_version.clone()),
            )
            .needs(tool(&self.tools.package_manager)),
        ];
        if !self.limits.targets.is_empty() {
            let mut limits = Step::new(
                ResourceKind::ResourceLimit,
                "inotify",
                DesiredState::LimitsAtLeast(self.limits.targets.clone()),
            );
            limits.optional = !self.limits.required;
            steps.push(limits);
        }
        steps.extend(self.config_files.iter().map(|f| {
            Step::new(
                ResourceKind::ConfigFile,
                &f.path.display().to_string(),
                DesiredState::FilePresent {
                    template: f.template.clone(),
                    required_keys: f.required.clone(),
                },
            )
        }));
        if let Some(network) = &self.network {
            steps.push(
                Step::new(ResourceKind::ContainerNetwork, network, DesiredState::NetworkPresent)
                    .needs(tool(&self.tools.container_runtime)),
            );
        }
        steps.extend(self.services.iter().map(|s| {
            Step::new(
                ResourceKind::ContainerService,
                &s.name,
                DesiredState::ServiceRunning {
                    provision_task: s.provision_task.clone(),
                    health_check: s.health_check.clone(),
                },
            )
            .needs(tool(&self.tools.container_runtime))
            .needs(tool(&self.tools.task_runner))
        }));

        let mut deps = Step::new(
            ResourceKind::DependencyTree,
            &self.manifest.display().to_string(),
            DesiredState::InstalledFrom {
                manifest: self.manifest.clone(),
                install_dir: self.install_dir.clone(),
            },
        )
        .needs(tool(&self.tools.package_manager));
        if opts.skip_install {
            deps.skip = Some("--skip-install".to_string());
        }
        steps.push(deps);

        let mut reset = Step::new(
            ResourceKind::Task,
            &self.tasks.reset,
            DesiredState::TaskCompleted {
                task: self.tasks.reset.clone(),
                marker: Some(self.state_dir.join(RESET_MARKER)),
            },
        )
        .needs(tool(&self.tools.task_runner));
        if opts.skip_reset {
            reset.skip = Some("--skip-reset".to_string());
        }
        steps.push(reset);

        let final_task = self.tasks.final_task(mode);
        steps.push(
            Step::new(
                ResourceKind::Task,
                final_task,
                DesiredState::TaskCompleted {
                    task: final_task.to_string(),
                    marker: None,
                },
            )
            .needs(tool(&self.tools.task_runner)),
        );
        steps
    }

    fn readiness(&self, service: &str) -> Readiness {
        self.services
            .iter()
            .find(|s| s.name == service)
            .map(|s| s.readiness)
            .unwrap_or_default()
    }
}

/// One planned reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub resource: ManagedResource,
    pub needs: Vec<Capability>,
    pub optional: bool,
    /// Set when a CLI toggle turned the step off.
    pub skip: Option<String>,
}

impl Step {
    fn new(kind: ResourceKind, name: &str, desired: DesiredState) -> Self {
        Self {
            resource: ManagedResource::new(kind, name, desired),
            needs: Vec::new(),
            optional: false,
            skip: None,
        }
    }

    fn needs(mut self, cap: Capability) -> Self {
        self.needs.push(cap);
        self
    }
}

/// CLI switches for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub server_only: bool,
    pub front_only: bool,
    pub skip_reset: bool,
    pub skip_install: bool,
    /// Re-run the one-time reset even if its marker exists.
    pub force_reset: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// The external capabilities a run drives.
pub struct Collaborators {
    pub versions: Box<dyn VersionManager>,
    pub package_manager: Box<dyn PackageManager>,
    pub containers: Box<dyn ContainerRuntime>,
    pub tasks: Box<dyn TaskRunner>,
    pub escalation: Box<dyn Escalation>,
    pub sysctl: Box<dyn Sysctl>,
    pub templates: Box<dyn TemplateSource>,
}

impl Collaborators {
    /// Collaborators backed by a [`SimWorld`], with file templates read from
    /// `root`.
    pub fn simulated(world: &SimWorld, root: &Path) -> Self {
        Self {
            versions: Box::new(world.version_manager()),
            package_manager: Box::new(world.package_manager()),
            containers: Box::new(world.container_runtime()),
            tasks: Box::new(world.task_runner()),
            escalation: Box::new(world.escalation()),
            sysctl: Box::new(world.sysctl()),
            templates: Box::new(FileTemplate::new(root)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Orchestrator {
    plan: Plan,
    collab: Collaborators,
    capabilities: CapabilityManager,
    interrupted: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(plan: Plan, collab: Collaborators, capabilities: CapabilityManager) -> Self {
        Self {
            plan,
            collab,
            capabilities,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned interrupt flag (set by a Ctrl-C handler).
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Validate, converge every step in order, and persist the report.
    pub fn run(&mut self, opts: &RunOptions) -> RunReport {
        let mut report = RunReport::start();
        let failure = match self.plan.validate(opts) {
            Ok(mode) => {
                report.mode = Some(mode);
                info!(run_id = %report.run_id, %mode, root = %self.plan.root.display(), "run started");
                self.converge(opts, mode, &mut report).err()
            }
            Err(err) => {
                warn!(error = %err, "configuration rejected; nothing was run");
                Some(err)
            }
        };
        report.finish(failure);
        self.persist(&report);
        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded(),
            actions = report.total_actions(),
            "run finished"
        );
        report
    }

    fn converge(&mut self, opts: &RunOptions, mode: RunMode, report: &mut RunReport) -> Result<(), RigError> {
        let steps = self.plan.steps(opts, mode);
        let last = steps.len();
        for (i, step) in steps.into_iter().enumerate() {
            let number = i + 1;
            let resource = &step.resource;
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(RigError::Interrupted {
                    step: resource.to_string(),
                });
            }
            let mut record = StepRecord {
                step: number,
                resource: resource.to_string(),
                kind: resource.kind(),
                status: StepStatus::Skipped { reason: String::new() },
                actions: 0,
                optional: step.optional,
            };
            if let Some(reason) = &step.skip {
                info!(resource = %resource, %reason, "skipped");
                record.status = StepStatus::Skipped { reason: reason.clone() };
                report.push(record);
                continue;
            }
            if number == last {
                // The final task can run for hours; leave a report behind first.
                self.persist(report);
            }

            let mut exec = VerifiedExecutor::new();
            let mut outcome = match self.preflight(&step) {
                Ok(()) => self.dispatch(&step, opts, &mut exec),
                Err(err) => ConvergenceOutcome::Failed(err),
            };
            // Ctrl-C reaches the running child too; its failure is the
            // interrupt, not a convergence problem.
            if outcome.is_failed() && self.interrupted.load(Ordering::SeqCst) {
                outcome = ConvergenceOutcome::Failed(RigError::Interrupted {
                    step: resource.to_string(),
                });
            }
            record.actions = exec.actions();
            record.status = StepStatus::Finished {
                outcome: outcome.clone(),
            };
            report.push(record);

            if let ConvergenceOutcome::Failed(err) = outcome {
                if step.optional && !matches!(err, RigError::Interrupted { .. }) {
                    warn!(resource = %resource, error = %err, "optional step failed; continuing");
                    continue;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn preflight(&self, step: &Step) -> Result<(), RigError> {
        step.needs.iter().try_for_each(|cap| self.capabilities.check(cap))
    }

    fn dispatch(&mut self, step: &Step, opts: &RunOptions, exec: &mut VerifiedExecutor) -> ConvergenceOutcome {
        let res = &step.resource;
        let plan = &self.plan;
        let c = &mut self.collab;
        match res.kind() {
            ResourceKind::ToolchainVersion => reconcile_toolchain(res, c.versions.as_mut(), exec),
            ResourceKind::PackageManager => reconcile_package_manager(res, c.package_manager.as_mut(), exec),
            ResourceKind::ResourceLimit => reconcile_limits(
                res,
                &plan.limits.persist_path,
                c.sysctl.as_ref(),
                c.escalation.as_mut(),
                exec,
            ),
            ResourceKind::ConfigFile => reconcile_config_file(res, &plan.root, c.templates.as_ref(), exec),
            ResourceKind::ContainerNetwork => reconcile_network(res, c.containers.as_mut(), exec),
            ResourceKind::ContainerService => reconcile_service(
                res,
                c.containers.as_mut(),
                c.tasks.as_mut(),
                &plan.readiness(res.name()),
                &self.interrupted,
                exec,
            ),
            ResourceKind::DependencyTree => {
                let detector = ChangeDetector::new(
                    plan.root.join(&plan.manifest),
                    FingerprintStore::new(plan.state_path(FINGERPRINT_FILE)),
                );
                reconcile_dependencies(res, &plan.root, &detector, c.package_manager.as_mut(), exec)
            }
            ResourceKind::Task => match res.desired() {
                DesiredState::TaskCompleted { marker: Some(_), .. } => {
                    reconcile_one_time_task(res, &plan.root, c.tasks.as_mut(), exec, opts.force_reset)
                }
                _ => run_foreground_task(res, c.tasks.as_mut(), exec),
            },
        }
    }

    fn persist(&self, report: &RunReport) {
        let path = self.plan.state_path(REPORT_FILE);
        if let Err(e) = report.save(&path) {
            warn!(path = %path.display(), error = %e, "could not write run report");
        }
    }
}
