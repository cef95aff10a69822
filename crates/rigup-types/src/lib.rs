//! `rigup-types` – shared data model and error taxonomy.
//!
//! Every other rigup crate speaks in these types: a [`ManagedResource`] names
//! one thing to converge, a [`StateSnapshot`] says what a probe saw, and a
//! [`ConvergenceOutcome`] records what a reconciler did about it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The category of a managed resource.  Determines which probe and which
/// reconciler handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Runtime toolchain pinned to an exact version (e.g. Node.js).
    ToolchainVersion,
    /// Package manager activated at an exact version (e.g. pnpm via corepack).
    PackageManager,
    /// Shared container network the services attach to.
    ContainerNetwork,
    /// A named long-lived container (database, cache, …).
    ContainerService,
    /// Kernel tunables that must meet a minimum value.
    ResourceLimit,
    /// A local configuration file materialized from a template.
    ConfigFile,
    /// Installed dependency tree keyed by the manifest fingerprint.
    DependencyTree,
    /// A task-runner task that runs once (reset) or in the foreground (dev).
    Task,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::ToolchainVersion => "toolchain",
            ResourceKind::PackageManager => "package-manager",
            ResourceKind::ContainerNetwork => "network",
            ResourceKind::ContainerService => "service",
            ResourceKind::ResourceLimit => "limits",
            ResourceKind::ConfigFile => "config-file",
            ResourceKind::DependencyTree => "dependencies",
            ResourceKind::Task => "task",
        };
        f.write_str(s)
    }
}

/// A kernel tunable and the minimum value it must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitTarget {
    /// sysctl key, e.g. `fs.inotify.max_user_watches`.
    pub key: String,
    pub value: u64,
}

impl LimitTarget {
    pub fn new(key: impl Into<String>, value: u64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// What "converged" means for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DesiredState {
    /// The reported version string must equal this exactly.
    ExactVersion(String),
    /// A container network with the resource's name must exist.
    NetworkPresent,
    /// A container with the resource's name must be running and answer its
    /// health check.
    ServiceRunning {
        provision_task: String,
        health_check: Vec<String>,
    },
    /// Every target must be met with `>=`.
    LimitsAtLeast(Vec<LimitTarget>),
    /// The file must exist; `required_keys` maps each mandatory key to the
    /// safe local default injected when it is missing.
    FilePresent {
        template: PathBuf,
        required_keys: BTreeMap<String, String>,
    },
    /// `install_dir` must hold an install of the current `manifest`.
    InstalledFrom {
        manifest: PathBuf,
        install_dir: PathBuf,
    },
    /// The task must have completed.  With a marker the completion persists
    /// across runs; without one the task runs every time.
    TaskCompleted {
        task: String,
        marker: Option<PathBuf>,
    },
}

/// One thing being reconciled.  Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    kind: ResourceKind,
    name: String,
    desired: DesiredState,
}

impl ManagedResource {
    pub fn new(kind: ResourceKind, name: impl Into<String>, desired: DesiredState) -> Self {
        Self {
            kind,
            name: name.into(),
            desired,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desired(&self) -> &DesiredState {
        &self.desired
    }
}

impl fmt::Display for ManagedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Result of probing a [`ManagedResource`].  Always computed fresh; never
/// carry one across a convergence action.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub present: bool,
    pub matches_desired: bool,
    pub details: BTreeMap<String, String>,
}

impl StateSnapshot {
    /// Nothing found.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Found, and `matches_desired` says whether it is in the desired state.
    pub fn present(matches_desired: bool) -> Self {
        Self {
            present: true,
            matches_desired,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

/// Tagged result of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ConvergenceOutcome {
    AlreadySatisfied,
    Converged,
    /// Converged, but something along the way needs the operator's attention
    /// (an action misreported its status, defaults were injected, …).
    ConvergedWithWarning(String),
    Failed(RigError),
}

impl ConvergenceOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ConvergenceOutcome::Failed(_))
    }

    pub fn is_converged(&self) -> bool {
        !self.is_failed()
    }

    /// Short label for logs and the run summary.
    pub fn label(&self) -> &'static str {
        match self {
            ConvergenceOutcome::AlreadySatisfied => "ok",
            ConvergenceOutcome::Converged => "converged",
            ConvergenceOutcome::ConvergedWithWarning(_) => "warning",
            ConvergenceOutcome::Failed(_) => "failed",
        }
    }
}

/// Which long-running development process the run ends with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    #[default]
    All,
    ServerOnly,
    FrontOnly,
}

impl RunMode {
    /// Resolve the mutually exclusive mode flags.
    ///
    /// # Errors
    ///
    /// [`RigError::Configuration`] when both flags are set.
    pub fn from_flags(server_only: bool, front_only: bool) -> Result<Self, RigError> {
        match (server_only, front_only) {
            (true, true) => Err(
                RigError::configuration("--server-only and --front-only are mutually exclusive")
                    .with_remedy(["rigup --server-only", "rigup --front-only"]),
            ),
            (true, false) => Ok(RunMode::ServerOnly),
            (false, true) => Ok(RunMode::FrontOnly),
            (false, false) => Ok(RunMode::All),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::All => write!(f, "all"),
            RunMode::ServerOnly => write!(f, "server-only"),
            RunMode::FrontOnly => write!(f, "front-only"),
        }
    }
}

/// An external capability a reconciler may depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// An executable that must be found on `PATH` (e.g. "docker").
    Tool(String),
    /// A way to run commands as root without rigup itself being root.
    PrivilegeEscalation,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Tool(name) => write!(f, "`{name}`"),
            Capability::PrivilegeEscalation => write!(f, "privilege escalation (sudo)"),
        }
    }
}

/// Raw result of one external command.  Carries no success semantics of its
/// own; reconcilers decide by re-probing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionOutput {
    /// Exit code, `None` when the child was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ActionOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// `"exit 3"` or `"signal"`, for log lines.
    pub fn exit_label(&self) -> String {
        match self.code {
            Some(c) => format!("exit {c}"),
            None => "signal".to_string(),
        }
    }
}

/// Error taxonomy for a rigup run.
///
/// Every fatal variant carries the exact commands an operator can run by hand
/// to fix the problem; see [`RigError::remedy`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RigError {
    #[error("Configuration error: {details}")]
    Configuration { details: String, remedy: Vec<String> },

    #[error("Missing capability: {capability} is not available")]
    MissingCapability {
        capability: Capability,
        remedy: Vec<String>,
    },

    #[error("Version mismatch on {resource}: wanted {desired}, found {actual}")]
    VersionMismatch {
        resource: String,
        desired: String,
        actual: String,
        remedy: Vec<String>,
    },

    #[error("{resource}: action failed and the desired state could not be verified ({details})")]
    ActionFailedUnverifiable {
        resource: String,
        details: String,
        remedy: Vec<String>,
    },

    #[error("{resource}: requirement unmet and no privilege escalation available")]
    PrivilegeUnavailable {
        resource: String,
        remedy: Vec<String>,
    },

    #[error("I/O error on {path}: {details}")]
    Io {
        path: String,
        details: String,
        remedy: Vec<String>,
    },

    #[error("Interrupted at {step}")]
    Interrupted { step: String },
}

impl RigError {
    /// Commands the operator can run to resolve the failure by hand.
    pub fn remedy(&self) -> &[String] {
        match self {
            RigError::Configuration { remedy, .. }
            | RigError::MissingCapability { remedy, .. }
            | RigError::VersionMismatch { remedy, .. }
            | RigError::ActionFailedUnverifiable { remedy, .. }
            | RigError::PrivilegeUnavailable { remedy, .. }
            | RigError::Io { remedy, .. } => remedy,
            // Re-running `rigup` resumes; there is nothing to fix.
            RigError::Interrupted { .. } => &[],
        }
    }

    /// Replace the remedy commands.  No-op for [`RigError::Interrupted`].
    pub fn with_remedy<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match &mut self {
            RigError::Configuration { remedy, .. }
            | RigError::MissingCapability { remedy, .. }
            | RigError::VersionMismatch { remedy, .. }
            | RigError::ActionFailedUnverifiable { remedy, .. }
            | RigError::PrivilegeUnavailable { remedy, .. }
            | RigError::Io { remedy, .. } => *remedy = commands.into_iter().map(Into::into).collect(),
            RigError::Interrupted { .. } => {}
        }
        self
    }

    /// A configuration error with no remedy yet; chain
    /// [`with_remedy`](Self::with_remedy).
    pub fn configuration(details: impl Into<String>) -> Self {
        RigError::Configuration {
            details: details.into(),
            remedy: Vec::new(),
        }
    }

    /// Filesystem error on `path`.  Call sites attach the fix with
    /// [`with_remedy`](Self::with_remedy).
    pub fn io(path: &Path, err: &std::io::Error) -> Self {
        RigError::Io {
            path: path.display().to_string(),
            details: err.to_string(),
            remedy: Vec::new(),
        }
    }
}
