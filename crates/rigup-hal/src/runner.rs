//! Command runner abstraction for executing shell commands.
//!
//! [`CommandRunner`] is what every process-backed collaborator uses to reach
//! the outside world.  [`ShellRunner`] spawns `sh -c`.  Neither interprets
//! exit codes: the caller gets the raw [`ActionOutput`] back.

use std::process::{Command, Stdio};

use rigup_types::{ActionOutput, RigError};
use tracing::debug;

/// Executes shell command strings.
pub trait CommandRunner {
    /// Run `cmd` with captured stdout/stderr.
    ///
    /// # Errors
    ///
    /// [`RigError::Io`] when the shell itself cannot be spawned.  A command
    /// that runs and exits non-zero is `Ok` with a non-zero code.
    fn run(&self, cmd: &str) -> Result<ActionOutput, RigError>;

    /// Run `cmd` attached to the terminal (inherited stdio).  Output is not
    /// captured.
    fn run_foreground(&self, cmd: &str) -> Result<ActionOutput, RigError>;
}

/// Production runner that spawns `sh -c <cmd>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, cmd: &str) -> Result<ActionOutput, RigError> {
        debug!(cmd, "spawning");
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_failed(cmd, &e))?;
        let result = ActionOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(cmd, exit = %result.exit_label(), "finished");
        Ok(result)
    }

    fn run_foreground(&self, cmd: &str) -> Result<ActionOutput, RigError> {
        debug!(cmd, "spawning in foreground");
        let status = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .status()
            .map_err(|e| spawn_failed(cmd, &e))?;
        Ok(ActionOutput {
            code: status.code(),
            ..ActionOutput::default()
        })
    }
}

/// The shell could not be started; the operator can still run `cmd` by hand.
fn spawn_failed(cmd: &str, err: &std::io::Error) -> RigError {
    RigError::Io {
        path: "sh".to_string(),
        details: format!("failed to execute `{cmd}`: {err}"),
        remedy: vec![cmd.to_string()],
    }
}

/// A shell command with a `{version}` placeholder, e.g.
/// `"fnm install {version}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate(String);

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Substitute `version` (shell-quoted) for every `{version}`.
    pub fn render(&self, version: &str) -> String {
        self.0.replace("{version}", &shell_quote(version))
    }
}

/// Quote `s` for `sh` unless it consists only of obviously safe characters.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.,:/=@+%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
