//! Privilege escalation and kernel-limit access.
//!
//! Escalation is optional.  When [`Escalation::available`] is `false` the
//! limit reconciler only reports what the operator should run.

use std::fs;
use std::path::{Path, PathBuf};

use rigup_types::{ActionOutput, RigError};

use crate::runner::{CommandRunner, shell_quote};

/// Runs commands as root on the operator's behalf.
pub trait Escalation {
    fn available(&self) -> bool;

    fn run_elevated(&mut self, argv: &[String]) -> Result<ActionOutput, RigError>;

    /// Replace `path` with `contents` as root.
    fn write_file(&mut self, path: &Path, contents: &str) -> Result<ActionOutput, RigError>;
}

/// Reads kernel tunables.
pub trait Sysctl {
    /// Current value of `key`, or `None` when the key does not exist on this
    /// kernel.
    fn read(&self, key: &str) -> Result<Option<u64>, RigError>;
}

/// [`Escalation`] through `sudo`.
pub struct SudoEscalation<R: CommandRunner> {
    runner: R,
    available: bool,
}

impl<R: CommandRunner> SudoEscalation<R> {
    /// Probe `PATH` for `sudo`.
    pub fn detect(runner: R) -> Self {
        let available = which::which("sudo").is_ok();
        Self { runner, available }
    }
}

impl<R: CommandRunner> Escalation for SudoEscalation<R> {
    fn available(&self) -> bool {
        self.available
    }

    fn run_elevated(&mut self, argv: &[String]) -> Result<ActionOutput, RigError> {
        let quoted: Vec<String> = argv.iter().map(|a| shell_quote(a)).collect();
        self.runner.run(&format!("sudo {}", quoted.join(" ")))
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<ActionOutput, RigError> {
        let target = shell_quote(&path.display().to_string());
        self.runner.run(&format!(
            "printf '%s' {} | sudo tee {target} > /dev/null",
            shell_quote(contents)
        ))
    }
}

/// [`Sysctl`] reading `/proc/sys`.
pub struct ProcSysctl {
    root: PathBuf,
}

impl ProcSysctl {
    pub fn new() -> Self {
        Self::with_root("/proc/sys")
    }

    /// Read from an alternative tree laid out like `/proc/sys`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('.').fold(self.root.clone(), |p, part| p.join(part))
    }
}

impl Default for ProcSysctl {
    fn default() -> Self {
        Self::new()
    }
}

impl Sysctl for ProcSysctl {
    fn read(&self, key: &str) -> Result<Option<u64>, RigError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| RigError::io(&path, &e).with_remedy([format!("sysctl {key}")]))?;
        // Multi-valued entries (e.g. ip_local_port_range) compare on the first.
        let first = raw.split_whitespace().next().unwrap_or_default();
        first.parse::<u64>().map(Some).map_err(|e| RigError::Io {
            path: path.display().to_string(),
            details: format!("unparsable value {first:?}: {e}"),
            remedy: vec![format!("sysctl {key}")],
        })
    }
}
