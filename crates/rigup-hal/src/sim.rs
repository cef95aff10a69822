//! In-process simulated collaborators for headless testing.
//!
//! [`SimWorld`] holds one shared [`SimState`] (installed versions, containers,
//! kernel limits, …).  Every collaborator it hands out reads and mutates that
//! same state, so a provisioning task really does make a container appear for
//! the next `list_running`.  Every mutating call is appended to
//! [`SimState::actions`]; probes are not, which lets tests assert that an
//! already-converged machine sees zero actions.
//!
//! # Example
//!
//! ```rust
//! use rigup_hal::sim::SimWorld;
//! use rigup_hal::VersionManager;
//!
//! let world = SimWorld::new().with_active_version("20.11.1");
//! let vm = world.version_manager();
//! assert_eq!(vm.current_version().as_deref(), Some("20.11.1"));
//! assert_eq!(world.action_count(), 0);
//! ```

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rigup_types::{ActionOutput, RigError};

use crate::container::ContainerRuntime;
use crate::privilege::{Escalation, Sysctl};
use crate::tasks::TaskRunner;
use crate::toolchain::{PackageManager, VersionManager};

/// Side effect a scripted task has on the simulated world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEffect {
    None,
    /// Create (or restart) the named container in the running state.
    StartContainer(String),
    /// Read a file while running; the contents (or `None`) land in
    /// [`SimState::files_read`].
    ReadFile(PathBuf),
}

/// Scripted result for one task name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskScript {
    /// `None` means the task was killed by Ctrl-C.
    pub code: Option<i32>,
    pub effect: TaskEffect,
}

/// The simulated machine.
#[derive(Debug, Default)]
pub struct SimState {
    /// Every mutating call, in order, rendered like the real command.
    pub actions: Vec<String>,
    pub installed_versions: BTreeSet<String>,
    pub active_version: Option<String>,
    /// When set, reported by `current_version` regardless of activation.
    pub pinned_report: Option<String>,
    pub pm_version: Option<String>,
    /// Package-manager counterpart of `pinned_report`.
    pub pinned_pm_report: Option<String>,
    /// Exit code `ensure` returns; the version is activated regardless.
    pub ensure_code: i32,
    /// Exit code `pnpm install` returns.
    pub install_code: i32,
    /// Directory created on disk by a successful dependency install.
    pub install_dir: Option<PathBuf>,
    pub networks: BTreeSet<String>,
    /// Container name → running?
    pub containers: BTreeMap<String, bool>,
    /// Containers whose readiness ping fails even while running.
    pub unhealthy: BTreeSet<String>,
    /// Readiness pings issued through `exec`.
    pub health_pings: usize,
    pub tasks: BTreeMap<String, TaskScript>,
    pub files_read: BTreeMap<PathBuf, Option<String>>,
    /// Raised when a killed task runs, as the terminal's SIGINT also reaches
    /// rigup's own handler.
    pub sigint: Option<Arc<AtomicBool>>,
    pub sysctl: BTreeMap<String, u64>,
    pub escalation: bool,
    /// Exit code for elevated file writes.
    pub write_code: i32,
    pub written_files: BTreeMap<PathBuf, String>,
}

/// Shared handle to a [`SimState`].
#[derive(Debug, Clone, Default)]
pub struct SimWorld(Rc<RefCell<SimState>>);

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Ref<'_, SimState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, SimState> {
        self.0.borrow_mut()
    }

    pub fn actions(&self) -> Vec<String> {
        self.state().actions.clone()
    }

    pub fn action_count(&self) -> usize {
        self.state().actions.len()
    }

    pub fn clear_actions(&self) {
        self.state_mut().actions.clear();
    }

    fn record(&self, action: String) {
        self.state_mut().actions.push(action);
    }

    // ── builder helpers ──────────────────────────────────────────────────

    pub fn with_active_version(self, version: &str) -> Self {
        {
            let mut s = self.state_mut();
            s.installed_versions.insert(version.to_string());
            s.active_version = Some(version.to_string());
        }
        self
    }

    pub fn with_pm_version(self, version: &str) -> Self {
        self.state_mut().pm_version = Some(version.to_string());
        self
    }

    pub fn with_network(self, name: &str) -> Self {
        self.state_mut().networks.insert(name.to_string());
        self
    }

    pub fn with_container(self, name: &str, running: bool) -> Self {
        self.state_mut().containers.insert(name.to_string(), running);
        self
    }

    pub fn with_task(self, task: &str, code: i32, effect: TaskEffect) -> Self {
        self.state_mut().tasks.insert(
            task.to_string(),
            TaskScript {
                code: Some(code),
                effect,
            },
        );
        self
    }

    /// `task` dies from Ctrl-C, raising the flag given to
    /// [`with_sigint`](Self::with_sigint).
    pub fn with_killed_task(self, task: &str) -> Self {
        self.state_mut().tasks.insert(
            task.to_string(),
            TaskScript {
                code: None,
                effect: TaskEffect::None,
            },
        );
        self
    }

    pub fn with_sigint(self, flag: Arc<AtomicBool>) -> Self {
        self.state_mut().sigint = Some(flag);
        self
    }

    pub fn with_sysctl(self, key: &str, value: u64) -> Self {
        self.state_mut().sysctl.insert(key.to_string(), value);
        self
    }

    pub fn with_escalation(self, available: bool) -> Self {
        self.state_mut().escalation = available;
        self
    }

    pub fn with_install_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.state_mut().install_dir = Some(dir.into());
        self
    }

    // ── collaborators ────────────────────────────────────────────────────

    pub fn version_manager(&self) -> SimVersionManager {
        SimVersionManager(self.clone())
    }

    pub fn package_manager(&self) -> SimPackageManager {
        SimPackageManager(self.clone())
    }

    pub fn container_runtime(&self) -> SimContainerRuntime {
        SimContainerRuntime(self.clone())
    }

    pub fn task_runner(&self) -> SimTaskRunner {
        SimTaskRunner(self.clone())
    }

    pub fn escalation(&self) -> SimEscalation {
        SimEscalation(self.clone())
    }

    pub fn sysctl(&self) -> SimSysctl {
        SimSysctl(self.clone())
    }
}

fn exit(code: i32) -> ActionOutput {
    if code == 0 {
        ActionOutput::ok("")
    } else {
        ActionOutput::failed(code, "simulated failure")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Toolchain
// ────────────────────────────────────────────────────────────────────────────

pub struct SimVersionManager(SimWorld);

impl VersionManager for SimVersionManager {
    fn install(&mut self, version: &str) -> Result<ActionOutput, RigError> {
        self.0.record(format!("install {version}"));
        // An already-installed version reports failure, like many managers.
        let fresh = self.0.state_mut().installed_versions.insert(version.to_string());
        Ok(exit(if fresh { 0 } else { 1 }))
    }

    fn activate(&mut self, version: &str) -> Result<ActionOutput, RigError> {
        self.0.record(format!("activate {version}"));
        let mut s = self.0.state_mut();
        if s.installed_versions.contains(version) {
            s.active_version = Some(version.to_string());
            Ok(exit(0))
        } else {
            Ok(exit(1))
        }
    }

    fn current_version(&self) -> Option<String> {
        let s = self.0.state();
        s.pinned_report.clone().or_else(|| s.active_version.clone())
    }

    fn remedy(&self, version: &str) -> Vec<String> {
        vec![format!("install {version}"), format!("activate {version}")]
    }
}

pub struct SimPackageManager(SimWorld);

impl PackageManager for SimPackageManager {
    fn ensure(&mut self, version: &str) -> Result<ActionOutput, RigError> {
        self.0.record(format!("ensure {version}"));
        let mut s = self.0.state_mut();
        s.pm_version = Some(version.to_string());
        Ok(exit(s.ensure_code))
    }

    fn current_version(&self) -> Option<String> {
        let s = self.0.state();
        s.pinned_pm_report.clone().or_else(|| s.pm_version.clone())
    }

    fn install_dependencies(&mut self) -> Result<ActionOutput, RigError> {
        self.0.record("install dependencies".to_string());
        let (code, dir) = {
            let s = self.0.state();
            (s.install_code, s.install_dir.clone())
        };
        if code == 0
            && let Some(dir) = dir
        {
            fs::create_dir_all(&dir).map_err(|e| RigError::io(&dir, &e))?;
        }
        Ok(exit(code))
    }

    fn remedy(&self, version: &str) -> Vec<String> {
        vec![format!("ensure {version}")]
    }

    fn install_command(&self) -> String {
        "install dependencies".to_string()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Containers
// ────────────────────────────────────────────────────────────────────────────

pub struct SimContainerRuntime(SimWorld);

impl ContainerRuntime for SimContainerRuntime {
    fn network_exists(&self, name: &str) -> Result<bool, RigError> {
        Ok(self.0.state().networks.contains(name))
    }

    fn create_network(&mut self, name: &str) -> Result<ActionOutput, RigError> {
        self.0.record(format!("network create {name}"));
        let fresh = self.0.state_mut().networks.insert(name.to_string());
        Ok(exit(if fresh { 0 } else { 1 }))
    }

    fn list_running(&self) -> Result<Vec<String>, RigError> {
        Ok(self
            .0
            .state()
            .containers
            .iter()
            .filter(|(_, running)| **running)
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn list_all(&self) -> Result<Vec<String>, RigError> {
        Ok(self.0.state().containers.keys().cloned().collect())
    }

    fn remove(&mut self, name: &str) -> Result<ActionOutput, RigError> {
        self.0.record(format!("rm {name}"));
        let existed = self.0.state_mut().containers.remove(name).is_some();
        Ok(exit(if existed { 0 } else { 1 }))
    }

    fn exec(&self, container: &str, _cmd: &[String]) -> Result<ActionOutput, RigError> {
        self.0.state_mut().health_pings += 1;
        let s = self.0.state();
        let healthy = s.containers.get(container).copied().unwrap_or(false)
            && !s.unhealthy.contains(container);
        Ok(exit(if healthy { 0 } else { 1 }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tasks
// ────────────────────────────────────────────────────────────────────────────

pub struct SimTaskRunner(SimWorld);

impl SimTaskRunner {
    fn run(&mut self, task: &str) -> ActionOutput {
        self.0.record(format!("task {task}"));
        let script = self.0.state().tasks.get(task).cloned();
        let script = script.unwrap_or(TaskScript {
            code: Some(0),
            effect: TaskEffect::None,
        });
        match &script.effect {
            TaskEffect::None => {}
            TaskEffect::StartContainer(name) => {
                self.0.state_mut().containers.insert(name.clone(), true);
            }
            TaskEffect::ReadFile(path) => {
                let contents = fs::read_to_string(path).ok();
                self.0.state_mut().files_read.insert(path.clone(), contents);
            }
        }
        match script.code {
            Some(code) => exit(code),
            None => {
                if let Some(flag) = self.0.state().sigint.clone() {
                    flag.store(true, Ordering::SeqCst);
                }
                ActionOutput {
                    code: None,
                    stdout: String::new(),
                    stderr: "killed by SIGINT".to_string(),
                }
            }
        }
    }
}

impl TaskRunner for SimTaskRunner {
    fn run_task(&mut self, task: &str) -> Result<ActionOutput, RigError> {
        Ok(self.run(task))
    }

    fn run_foreground(&mut self, task: &str) -> Result<ActionOutput, RigError> {
        Ok(self.run(task))
    }

    fn command_for(&self, task: &str) -> String {
        format!("task {task}")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Privilege & limits
// ────────────────────────────────────────────────────────────────────────────

pub struct SimEscalation(SimWorld);

impl Escalation for SimEscalation {
    fn available(&self) -> bool {
        self.0.state().escalation
    }

    fn run_elevated(&mut self, argv: &[String]) -> Result<ActionOutput, RigError> {
        self.0.record(format!("sudo {}", argv.join(" ")));
        // Understands `sysctl -w key=value`.
        if let [cmd, flag, assignment] = argv
            && cmd == "sysctl"
            && flag == "-w"
            && let Some((key, value)) = assignment.split_once('=')
            && let Ok(value) = value.trim().parse::<u64>()
        {
            self.0.state_mut().sysctl.insert(key.trim().to_string(), value);
            return Ok(exit(0));
        }
        Ok(exit(1))
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<ActionOutput, RigError> {
        self.0.record(format!("sudo tee {}", path.display()));
        let code = self.0.state().write_code;
        if code == 0 {
            self.0
                .state_mut()
                .written_files
                .insert(path.to_path_buf(), contents.to_string());
        }
        Ok(exit(code))
    }
}

pub struct SimSysctl(SimWorld);

impl Sysctl for SimSysctl {
    fn read(&self, key: &str) -> Result<Option<u64>, RigError> {
        Ok(self.0.state().sysctl.get(key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_are_not_recorded_as_actions() {
        let world = SimWorld::new()
            .with_active_version("20.11.1")
            .with_container("postgres", true);
        let rt = world.container_runtime();
        assert_eq!(rt.list_running().unwrap(), vec!["postgres"]);
        assert!(rt.exec("postgres", &[]).unwrap().success());
        assert_eq!(world.version_manager().current_version().as_deref(), Some("20.11.1"));
        assert_eq!(world.action_count(), 0);
    }

    #[test]
    fn reinstall_reports_failure_but_activation_succeeds() {
        let world = SimWorld::new().with_active_version("20.11.1");
        let mut vm = world.version_manager();
        assert!(!vm.install("20.11.1").unwrap().success());
        assert!(vm.activate("20.11.1").unwrap().success());
        assert_eq!(world.actions(), vec!["install 20.11.1", "activate 20.11.1"]);
    }

    #[test]
    fn task_effect_starts_container() {
        let world = SimWorld::new().with_task(
            "db:up",
            1,
            TaskEffect::StartContainer("postgres".into()),
        );
        let out = world.task_runner().run_task("db:up").unwrap();
        assert!(!out.success());
        assert_eq!(world.container_runtime().list_running().unwrap(), vec!["postgres"]);
    }

    #[test]
    fn killed_task_reports_signal_and_raises_sigint() {
        let flag = Arc::new(AtomicBool::new(false));
        let world = SimWorld::new().with_killed_task("dev").with_sigint(flag.clone());
        let out = world.task_runner().run_foreground("dev").unwrap();
        assert_eq!(out.code, None);
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(world.actions(), vec!["task dev"]);
    }

    #[test]
    fn read_file_effect_captures_contents() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let present = dir.path().join("seen.json");
        let absent = dir.path().join("missing.json");
        fs::write(&present, "{}").unwrap();
        let world = SimWorld::new()
            .with_task("a", 0, TaskEffect::ReadFile(present.clone()))
            .with_task("b", 0, TaskEffect::ReadFile(absent.clone()));
        let mut tasks = world.task_runner();
        tasks.run_task("a").unwrap();
        tasks.run_task("b").unwrap();
        let s = world.state();
        assert_eq!(s.files_read[&present].as_deref(), Some("{}"));
        assert_eq!(s.files_read[&absent], None);
    }

    #[test]
    fn pinned_pm_report_overrides_ensure() {
        let world = SimWorld::new();
        world.state_mut().pinned_pm_report = Some("8.15.0".into());
        let mut pm = world.package_manager();
        assert!(pm.ensure("9.1.0").unwrap().success());
        assert_eq!(pm.current_version().as_deref(), Some("8.15.0"));
    }

    #[test]
    fn elevated_sysctl_updates_limits() {
        let world = SimWorld::new()
            .with_escalation(true)
            .with_sysctl("fs.inotify.max_user_watches", 8192);
        let mut esc = world.escalation();
        let out = esc
            .run_elevated(&["sysctl".into(), "-w".into(), "fs.inotify.max_user_watches=524288".into()])
            .unwrap();
        assert!(out.success());
        assert_eq!(
            world.sysctl().read("fs.inotify.max_user_watches").unwrap(),
            Some(524288)
        );
    }

    #[test]
    fn unhealthy_container_fails_exec() {
        let world = SimWorld::new().with_container("redis", true);
        world.state_mut().unhealthy.insert("redis".into());
        assert!(!world.container_runtime().exec("redis", &[]).unwrap().success());
    }

    #[test]
    fn dependency_install_creates_install_dir() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let target = dir.path().join("node_modules");
        let world = SimWorld::new().with_install_dir(&target);
        assert!(world.package_manager().install_dependencies().unwrap().success());
        assert!(target.is_dir());
    }
}
