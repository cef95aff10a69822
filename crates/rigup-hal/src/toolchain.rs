//! Toolchain collaborators: the runtime version manager (fnm, nvm, …) and the
//! package-manager activation layer (corepack).
//!
//! Both are driven through configurable [`CommandTemplate`]s so the same code
//! works with whichever manager the project standardizes on.

use rigup_types::{ActionOutput, RigError};

use crate::runner::{CommandRunner, CommandTemplate};

/// Installs and activates exact runtime versions.
pub trait VersionManager {
    /// Install `version`.  Re-installing an installed version is allowed to
    /// report failure; callers verify by re-reading the version.
    fn install(&mut self, version: &str) -> Result<ActionOutput, RigError>;

    /// Make `version` the active one.
    fn activate(&mut self, version: &str) -> Result<ActionOutput, RigError>;

    /// The currently reported version, normalized (no leading `v`), or `None`
    /// when no runtime answers.
    fn current_version(&self) -> Option<String>;

    /// The exact commands an operator would run to reach `version` by hand.
    fn remedy(&self, version: &str) -> Vec<String>;
}

/// Activates an exact package-manager version and installs dependencies.
pub trait PackageManager {
    fn ensure(&mut self, version: &str) -> Result<ActionOutput, RigError>;

    fn current_version(&self) -> Option<String>;

    /// Install the project's dependency tree from its manifest.
    fn install_dependencies(&mut self) -> Result<ActionOutput, RigError>;

    fn remedy(&self, version: &str) -> Vec<String>;

    /// The install command, for remediation messages.
    fn install_command(&self) -> String;
}

/// Strip whitespace and a leading `v` from a reported version (`"v20.11.1\n"`
/// → `"20.11.1"`).
pub fn normalize_version(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed).to_string()
}

fn query_version<R: CommandRunner>(runner: &R, query: &str) -> Option<String> {
    match runner.run(query) {
        Ok(out) if out.success() => {
            let v = normalize_version(out.stdout.lines().next().unwrap_or_default());
            if v.is_empty() { None } else { Some(v) }
        }
        _ => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shell-backed version manager
// ────────────────────────────────────────────────────────────────────────────

/// [`VersionManager`] driven by shell command templates.
pub struct ShellVersionManager<R: CommandRunner> {
    runner: R,
    install: CommandTemplate,
    activate: CommandTemplate,
    query: String,
}

impl<R: CommandRunner> ShellVersionManager<R> {
    pub fn new(runner: R, install: CommandTemplate, activate: CommandTemplate, query: impl Into<String>) -> Self {
        Self {
            runner,
            install,
            activate,
            query: query.into(),
        }
    }
}

impl<R: CommandRunner> VersionManager for ShellVersionManager<R> {
    fn install(&mut self, version: &str) -> Result<ActionOutput, RigError> {
        self.runner.run(&self.install.render(version))
    }

    fn activate(&mut self, version: &str) -> Result<ActionOutput, RigError> {
        self.runner.run(&self.activate.render(version))
    }

    fn current_version(&self) -> Option<String> {
        query_version(&self.runner, &self.query)
    }

    fn remedy(&self, version: &str) -> Vec<String> {
        vec![
            self.install.render(version),
            self.activate.render(version),
            self.query.clone(),
        ]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shell-backed package manager
// ────────────────────────────────────────────────────────────────────────────

/// [`PackageManager`] driven by shell command templates.
pub struct ShellPackageManager<R: CommandRunner> {
    runner: R,
    ensure: CommandTemplate,
    query: String,
    install: String,
}

impl<R: CommandRunner> ShellPackageManager<R> {
    pub fn new(runner: R, ensure: CommandTemplate, query: impl Into<String>, install: impl Into<String>) -> Self {
        Self {
            runner,
            ensure,
            query: query.into(),
            install: install.into(),
        }
    }
}

impl<R: CommandRunner> PackageManager for ShellPackageManager<R> {
    fn ensure(&mut self, version: &str) -> Result<ActionOutput, RigError> {
        self.runner.run(&self.ensure.render(version))
    }

    fn current_version(&self) -> Option<String> {
        query_version(&self.runner, &self.query)
    }

    fn install_dependencies(&mut self) -> Result<ActionOutput, RigError> {
        // Streams progress straight to the terminal; installs can be long.
        self.runner.run_foreground(&self.install)
    }

    fn remedy(&self, version: &str) -> Vec<String> {
        vec![self.ensure.render(version), self.query.clone()]
    }

    fn install_command(&self) -> String {
        self.install.clone()
    }
}
