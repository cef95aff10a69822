//! Task-runner collaborator (`task`, `make`, `just`, …).

use rigup_types::{ActionOutput, RigError};

use crate::runner::{CommandRunner, shell_quote};

/// Runs named project tasks.
pub trait TaskRunner {
    /// Run `task` with captured output.
    fn run_task(&mut self, task: &str) -> Result<ActionOutput, RigError>;

    /// Run `task` attached to the terminal; blocks until it exits.
    fn run_foreground(&mut self, task: &str) -> Result<ActionOutput, RigError>;

    /// The command line that runs `task`, for remediation messages.
    fn command_for(&self, task: &str) -> String;
}

/// [`TaskRunner`] that shells out to a task-runner program.
pub struct ShellTaskRunner<R: CommandRunner> {
    runner: R,
    program: String,
}

impl<R: CommandRunner> ShellTaskRunner<R> {
    pub fn new(runner: R, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

impl<R: CommandRunner> TaskRunner for ShellTaskRunner<R> {
    fn run_task(&mut self, task: &str) -> Result<ActionOutput, RigError> {
        self.runner.run(&self.command_for(task))
    }

    fn run_foreground(&mut self, task: &str) -> Result<ActionOutput, RigError> {
        self.runner.run_foreground(&self.command_for(task))
    }

    fn command_for(&self, task: &str) -> String {
        format!("{} {}", self.program, shell_quote(task))
    }
}
