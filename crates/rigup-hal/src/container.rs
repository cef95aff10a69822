//! Container runtime collaborator.
//!
//! The query methods (`network_exists`, `list_*`, `exec`) are read-only and
//! safe to call repeatedly; `create_network` and `remove` mutate.

use rigup_types::{ActionOutput, Capability, RigError};

use crate::runner::{CommandRunner, shell_quote};

/// The subset of a container runtime rigup needs.
pub trait ContainerRuntime {
    fn network_exists(&self, name: &str) -> Result<bool, RigError>;

    fn create_network(&mut self, name: &str) -> Result<ActionOutput, RigError>;

    /// Names of running containers.
    fn list_running(&self) -> Result<Vec<String>, RigError>;

    /// Names of all containers, running or stopped.
    fn list_all(&self) -> Result<Vec<String>, RigError>;

    /// Force-remove a container.
    fn remove(&mut self, name: &str) -> Result<ActionOutput, RigError>;

    /// Run `cmd` inside `container`.  Used for readiness pings.
    fn exec(&self, container: &str, cmd: &[String]) -> Result<ActionOutput, RigError>;
}

/// [`ContainerRuntime`] backed by the `docker` CLI.
pub struct DockerRuntime<R: CommandRunner> {
    runner: R,
    program: String,
}

impl<R: CommandRunner> DockerRuntime<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            program: "docker".to_string(),
        }
    }

    /// Use a docker-compatible CLI under another name (e.g. `podman`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn list(&self, all: bool) -> Result<Vec<String>, RigError> {
        let flag = if all { " -a" } else { "" };
        let cmd = format!("{} ps{flag} --format '{{{{.Names}}}}'", self.program);
        let out = self.runner.run(&cmd)?;
        if !out.success() {
            // The daemon is down or unreachable: nothing can be reconciled.
            return Err(RigError::MissingCapability {
                capability: Capability::Tool(format!("{} daemon", self.program)),
                remedy: vec![
                    "sudo systemctl start docker".to_string(),
                    format!("{} info", self.program),
                ],
            });
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl<R: CommandRunner> ContainerRuntime for DockerRuntime<R> {
    fn network_exists(&self, name: &str) -> Result<bool, RigError> {
        let cmd = format!("{} network inspect {}", self.program, shell_quote(name));
        Ok(self.runner.run(&cmd)?.success())
    }

    fn create_network(&mut self, name: &str) -> Result<ActionOutput, RigError> {
        self.runner
            .run(&format!("{} network create {}", self.program, shell_quote(name)))
    }

    fn list_running(&self) -> Result<Vec<String>, RigError> {
        self.list(false)
    }

    fn list_all(&self) -> Result<Vec<String>, RigError> {
        self.list(true)
    }

    fn remove(&mut self, name: &str) -> Result<ActionOutput, RigError> {
        self.runner
            .run(&format!("{} rm -f {}", self.program, shell_quote(name)))
    }

    fn exec(&self, container: &str, cmd: &[String]) -> Result<ActionOutput, RigError> {
        let argv: Vec<String> = cmd.iter().map(|a| shell_quote(a)).collect();
        self.runner.run(&format!(
            "{} exec {} {}",
            self.program,
            shell_quote(container),
            argv.join(" ")
        ))
    }
}
