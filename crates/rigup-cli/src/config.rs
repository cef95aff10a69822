//! Project configuration – reads `rigup.toml` from the project root.
//!
//! Every field has a serde default, so a missing file (or a partial one)
//! yields the stock Node.js/pnpm setup.  `RIGUP_*` environment variables
//! override a few fields after parsing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rigup_runtime::{ConfigFileSpec, LimitsSpec, Plan, Readiness, ServiceSpec, TaskNames, ToolNames};
use rigup_types::{LimitTarget, RigError};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "rigup.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Files that must exist in the working directory.
    #[serde(default = "default_root_markers")]
    pub root_markers: Vec<PathBuf>,

    /// Tool-private state directory, relative to the project root.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub toolchain: ToolchainConfig,

    #[serde(default)]
    pub package_manager: PackageManagerConfig,

    #[serde(default)]
    pub containers: ContainersConfig,

    #[serde(default)]
    pub config_files: Vec<ConfigFileConfig>,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub dependencies: DependenciesConfig,

    #[serde(default)]
    pub tasks: TasksConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_markers: default_root_markers(),
            state_dir: default_state_dir(),
            toolchain: ToolchainConfig::default(),
            package_manager: PackageManagerConfig::default(),
            containers: ContainersConfig::default(),
            config_files: Vec::new(),
            limits: LimitsConfig::default(),
            dependencies: DependenciesConfig::default(),
            tasks: TasksConfig::default(),
        }
    }
}

fn default_root_markers() -> Vec<PathBuf> {
    vec![PathBuf::from("package.json"), PathBuf::from("Taskfile.yml")]
}
fn default_state_dir() -> PathBuf {
    PathBuf::from(".rigup")
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[toolchain]` – `{version}` is substituted in the command templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub name: String,
    pub version: String,
    /// Version-manager executable checked on `PATH` before the step.
    pub program: String,
    pub install: String,
    pub activate: String,
    pub query: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
            version: "20.11.1".to_string(),
            program: "fnm".to_string(),
            install: "fnm install {version}".to_string(),
            activate: "fnm default {version}".to_string(),
            query: "fnm exec --using=default node --version".to_string(),
        }
    }
}

/// `[package_manager]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageManagerConfig {
    pub name: String,
    pub version: String,
    pub program: String,
    pub ensure: String,
    pub query: String,
    pub install: String,
}

impl Default for PackageManagerConfig {
    fn default() -> Self {
        Self {
            name: "pnpm".to_string(),
            version: "9.1.0".to_string(),
            program: "corepack".to_string(),
            ensure: "corepack prepare pnpm@{version} --activate".to_string(),
            query: "pnpm --version".to_string(),
            install: "pnpm install --frozen-lockfile".to_string(),
        }
    }
}

/// `[containers]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainersConfig {
    /// Docker-compatible CLI.
    pub program: String,
    pub network: Option<String>,
    pub services: Vec<ServiceConfig>,
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            network: None,
            services: Vec::new(),
        }
    }
}

/// `[[containers.services]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub provision_task: String,
    /// argv run inside the container; exit 0 means ready.
    #[serde(default)]
    pub health_check: Vec<String>,
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,
    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,
}

fn default_readiness_attempts() -> u32 {
    30
}
fn default_readiness_interval_ms() -> u64 {
    1000
}

/// `[[config_files]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFileConfig {
    pub path: PathBuf,
    pub template: PathBuf,
    /// Required key → safe local default.
    #[serde(default)]
    pub required: BTreeMap<String, String>,
}

/// `[limits]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub required: bool,
    pub persist_path: PathBuf,
    pub targets: BTreeMap<String, u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let defaults = LimitsSpec::default();
        Self {
            required: defaults.required,
            persist_path: defaults.persist_path,
            targets: defaults.targets.into_iter().map(|t| (t.key, t.value)).collect(),
        }
    }
}

/// `[dependencies]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependenciesConfig {
    pub manifest: PathBuf,
    pub install_dir: PathBuf,
}

impl Default for DependenciesConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("pnpm-lock.yaml"),
            install_dir: PathBuf::from("node_modules"),
        }
    }
}

/// `[tasks]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub program: String,
    pub reset: String,
    pub all: String,
    pub server: String,
    pub front: String,
}

impl Default for TasksConfig {
    fn default() -> Self {
        let names = TaskNames::default();
        Self {
            program: "task".to_string(),
            reset: names.reset,
            all: names.all,
            server: names.server,
            front: names.front,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load `path`, falling back to defaults when it does not exist.  Environment
/// overrides apply either way.
pub fn load(path: &Path) -> Result<Config, RigError> {
    let mut cfg = match load_from(path)? {
        Some(cfg) => cfg,
        None => Config::default(),
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse `path` without applying overrides.  `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, RigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| RigError::io(path, &e).with_remedy([format!("chmod u+r {}", path.display())]))?;
    toml::from_str(&raw).map(Some).map_err(|e| {
        RigError::configuration(format!("failed to parse {}: {e}", path.display()))
            .with_remedy([format!("mv {0} {0}.bak", path.display())])
    })
}

/// Apply `RIGUP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RIGUP_NODE_VERSION` | `toolchain.version` |
/// | `RIGUP_PNPM_VERSION` | `package_manager.version` |
/// | `RIGUP_STATE_DIR` | `state_dir` |
/// | `RIGUP_NETWORK` | `containers.network` (empty disables it) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("RIGUP_NODE_VERSION")
        && !v.trim().is_empty()
    {
        cfg.toolchain.version = v.trim().to_string();
    }
    if let Ok(v) = std::env::var("RIGUP_PNPM_VERSION")
        && !v.trim().is_empty()
    {
        cfg.package_manager.version = v.trim().to_string();
    }
    if let Ok(v) = std::env::var("RIGUP_STATE_DIR")
        && !v.is_empty()
    {
        cfg.state_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("RIGUP_NETWORK") {
        cfg.containers.network = (!v.is_empty()).then_some(v);
    }
}

impl Config {
    /// Resolve into the orchestrator's [`Plan`] for the project at `root`.
    pub fn plan(&self, root: &Path) -> Plan {
        Plan {
            root: root.to_path_buf(),
            root_markers: self.root_markers.clone(),
            state_dir: self.state_dir.clone(),
            toolchain: self.toolchain.name.clone(),
            toolchain_version: self.toolchain.version.clone(),
            package_manager: self.package_manager.name.clone(),
            package_manager_version: self.package_manager.version.clone(),
            limits: LimitsSpec {
                targets: self
                    .limits
                    .targets
                    .iter()
                    .map(|(k, v)| LimitTarget::new(k.clone(), *v))
                    .collect(),
                required: self.limits.required,
                persist_path: self.limits.persist_path.clone(),
            },
            config_files: self
                .config_files
                .iter()
                .map(|f| ConfigFileSpec {
                    path: f.path.clone(),
                    template: f.template.clone(),
                    required: f.required.clone(),
                })
                .collect(),
            network: self.containers.network.clone(),
            services: self
                .containers
                .services
                .iter()
                .map(|s| ServiceSpec {
                    name: s.name.clone(),
                    provision_task: s.provision_task.clone(),
                    health_check: s.health_check.clone(),
                    readiness: Readiness::new(
                        s.readiness_attempts,
                        Duration::from_millis(s.readiness_interval_ms),
                    ),
                })
                .collect(),
            manifest: self.dependencies.manifest.clone(),
            install_dir: self.dependencies.install_dir.clone(),
            tasks: TaskNames {
                reset: self.tasks.reset.clone(),
                all: self.tasks.all.clone(),
                server: self.tasks.server.clone(),
                front: self.tasks.front.clone(),
            },
            tools: ToolNames {
                version_manager: self.toolchain.program.clone(),
                package_manager: self.package_manager.program.clone(),
                container_runtime: self.containers.program.clone(),
                task_runner: self.tasks.program.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join(CONFIG_FILE)).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
[toolchain]
version = "22.2.0"

[containers]
network = "app-net"

[[containers.services]]
name = "postgres"
provision_task = "db:up"
health_check = ["pg_isready", "-U", "postgres"]

[[config_files]]
path = ".env"
template = ".env.example"
required = { DATABASE_URL = "postgres://postgres@localhost/app" }
"#,
        )
        .unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.toolchain.version, "22.2.0");
        assert_eq!(cfg.toolchain.install, "fnm install {version}");
        assert_eq!(cfg.package_manager.version, "9.1.0");
        assert_eq!(cfg.containers.services[0].readiness_attempts, 30);
        assert_eq!(cfg.limits.targets["fs.inotify.max_user_watches"], 524288);
        assert_eq!(cfg.config_files[0].required.len(), 1);
    }

    #[test]
    fn malformed_file_is_configuration_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[toolchain\nversion = ").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(matches!(err, RigError::Configuration { .. }));
        assert!(err.remedy()[0].starts_with("mv "));
    }

    #[test]
    fn plan_carries_services_and_tools() {
        let mut cfg = Config::default();
        cfg.containers.network = Some("app-net".into());
        cfg.containers.services.push(ServiceConfig {
            name: "redis".into(),
            provision_task: "cache:up".into(),
            health_check: vec!["redis-cli".into(), "ping".into()],
            readiness_attempts: 5,
            readiness_interval_ms: 200,
        });
        let plan = cfg.plan(Path::new("/work/app"));
        assert_eq!(plan.root, PathBuf::from("/work/app"));
        assert_eq!(plan.services[0].readiness, Readiness::new(5, Duration::from_millis(200)));
        assert_eq!(plan.tools.container_runtime, "docker");
        assert_eq!(plan.limits.targets.len(), 2);
    }

    #[test]
    fn apply_env_overrides_changes_versions() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RIGUP_NODE_VERSION", "18.19.0") };
        unsafe { std::env::set_var("RIGUP_PNPM_VERSION", "8.15.4") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.toolchain.version, "18.19.0");
        assert_eq!(cfg.package_manager.version, "8.15.4");
        unsafe { std::env::remove_var("RIGUP_NODE_VERSION") };
        unsafe { std::env::remove_var("RIGUP_PNPM_VERSION") };
    }

    #[test]
    fn apply_env_overrides_empty_network_disables_it() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RIGUP_NETWORK", "") };
        let mut cfg = Config::default();
        cfg.containers.network = Some("app-net".into());
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.containers.network, None);
        unsafe { std::env::remove_var("RIGUP_NETWORK") };
    }

    #[test]
    fn apply_env_overrides_changes_state_dir() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RIGUP_STATE_DIR", ".cache/rigup") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.state_dir, PathBuf::from(".cache/rigup"));
        unsafe { std::env::remove_var("RIGUP_STATE_DIR") };
    }
}
