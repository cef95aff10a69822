//! Task reconcilers: the one-time data reset and the final foreground task.
//!
//! Tasks have no probe of their own.  A one-time task's completion is the
//! marker file written after it exits zero; the foreground task is judged by
//! its exit status alone.

use std::fs;
use std::path::Path;

use rigup_hal::TaskRunner;
use rigup_kernel::VerifiedExecutor;
use rigup_kernel::probe::probe_path;
use rigup_types::{ConvergenceOutcome, DesiredState, ManagedResource, RigError, StateSnapshot};
use tracing::info;

use super::{Lifecycle, remedy, wrong_descriptor};

/// Run the resource's task unless its marker (relative to `root`) exists.
/// `force` ignores the marker.
pub fn reconcile_one_time_task(
    resource: &ManagedResource,
    root: &Path,
    tasks: &mut dyn TaskRunner,
    exec: &mut VerifiedExecutor,
    force: bool,
) -> ConvergenceOutcome {
    let DesiredState::TaskCompleted { task, marker } = resource.desired() else {
        return wrong_descriptor(resource, "task");
    };
    let marker = marker.as_ref().map(|m| root.join(m));
    let mut lc = Lifecycle::start(resource);
    let snapshot = match (&marker, force) {
        (Some(m), false) => probe_path(m),
        _ => StateSnapshot::absent(),
    };
    if !lc.probed(&snapshot) {
        return lc.satisfied();
    }
    if force {
        info!(resource = %resource, "forced re-run");
    }

    let name = resource.to_string();
    let result = (|| -> Result<Option<String>, RigError> {
        let out = exec.execute(&name, "run", || tasks.run_task(task))?;
        let exited_ok = out.success();
        let verified = exec.verify(&name, out, || Ok(exited_ok))?;
        if !verified.confirmed {
            return Err(RigError::ActionFailedUnverifiable {
                resource: name.clone(),
                details: verified.reported(),
                remedy: remedy([tasks.command_for(task)]),
            });
        }
        if let Some(m) = &marker {
            // The task itself succeeded; only the marker is missing.
            let touch = |err: RigError| {
                let parent = m.parent().unwrap_or(Path::new("."));
                err.with_remedy([format!("mkdir -p {} && touch {}", parent.display(), m.display())])
            };
            if let Some(parent) = m.parent() {
                fs::create_dir_all(parent).map_err(|e| touch(RigError::io(parent, &e)))?;
            }
            fs::write(m, format!("{}\n", chrono::Utc::now().to_rfc3339()))
                .map_err(|e| touch(RigError::io(m, &e)))?;
        }
        Ok(None)
    })();
    lc.finish(result)
}

/// Run the long-lived development task attached to the terminal.  Blocks
/// until it exits.
pub fn run_foreground_task(
    resource: &ManagedResource,
    tasks: &mut dyn TaskRunner,
    exec: &mut VerifiedExecutor,
) -> ConvergenceOutcome {
    let DesiredState::TaskCompleted { task, .. } = resource.desired() else {
        return wrong_descriptor(resource, "task");
    };
    let mut lc = Lifecycle::start(resource);
    lc.probed(&StateSnapshot::absent());

    let name = resource.to_string();
    let out = match exec.execute(&name, "foreground", || tasks.run_foreground(task)) {
        Ok(out) => out,
        Err(e) => return lc.failed(e),
    };
    if out.code.is_none() {
        return lc.failed(RigError::Interrupted { step: name });
    }
    if !out.success() {
        return lc.failed(RigError::ActionFailedUnverifiable {
            resource: name,
            details: format!("{} {}", task, out.exit_label()),
            remedy: remedy([tasks.command_for(task)]),
        });
    }
    lc.converged(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigup_hal::sim::{SimWorld, TaskEffect};
    use rigup_types::ResourceKind;

    fn reset() -> ManagedResource {
        ManagedResource::new(
            ResourceKind::Task,
            "reset",
            DesiredState::TaskCompleted {
                task: "db:reset".into(),
                marker: Some(".rigup/reset.done".into()),
            },
        )
    }

    #[test]
    fn reset_runs_once() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let world = SimWorld::new();
        let first = reconcile_one_time_task(&reset(), dir.path(), &mut world.task_runner(), &mut VerifiedExecutor::new(), false);
        assert_eq!(first, ConvergenceOutcome::Converged);
        assert!(dir.path().join(".rigup/reset.done").exists());

        let second = reconcile_one_time_task(&reset(), dir.path(), &mut world.task_runner(), &mut VerifiedExecutor::new(), false);
        assert_eq!(second, ConvergenceOutcome::AlreadySatisfied);
        assert_eq!(world.actions(), vec!["task db:reset"]);
    }

    #[test]
    fn force_ignores_marker() {
        let dir = tempfile::tempdir().expect("tmp dir");
        fs::create_dir_all(dir.path().join(".rigup")).unwrap();
        fs::write(dir.path().join(".rigup/reset.done"), "").unwrap();
        let world = SimWorld::new();
        let outcome = reconcile_one_time_task(&reset(), dir.path(), &mut world.task_runner(), &mut VerifiedExecutor::new(), true);
        assert_eq!(outcome, ConvergenceOutcome::Converged);
        assert_eq!(world.action_count(), 1);
    }

    #[test]
    fn failed_reset_writes_no_marker() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let world = SimWorld::new().with_task("db:reset", 2, TaskEffect::None);
        let outcome = reconcile_one_time_task(&reset(), dir.path(), &mut world.task_runner(), &mut VerifiedExecutor::new(), false);
        let ConvergenceOutcome::Failed(err) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(err.remedy(), ["task db:reset"]);
        assert!(!dir.path().join(".rigup/reset.done").exists());
    }

    #[test]
    fn foreground_exit_status_decides() {
        let dev = ManagedResource::new(
            ResourceKind::Task,
            "dev",
            DesiredState::TaskCompleted {
                task: "dev".into(),
                marker: None,
            },
        );
        let world = SimWorld::new();
        assert_eq!(
            run_foreground_task(&dev, &mut world.task_runner(), &mut VerifiedExecutor::new()),
            ConvergenceOutcome::Converged
        );
        world.state_mut().tasks.clear();
        let world = world.with_task("dev", 130, TaskEffect::None);
        assert!(run_foreground_task(&dev, &mut world.task_runner(), &mut VerifiedExecutor::new()).is_failed());
    }

    #[test]
    fn foreground_killed_by_signal_is_interrupted() {
        let dev = ManagedResource::new(
            ResourceKind::Task,
            "dev:server",
            DesiredState::TaskCompleted {
                task: "dev:server".into(),
                marker: None,
            },
        );
        let world = SimWorld::new().with_killed_task("dev:server");
        let mut exec = VerifiedExecutor::new();
        let outcome = run_foreground_task(&dev, &mut world.task_runner(), &mut exec);
        assert_eq!(
            outcome,
            ConvergenceOutcome::Failed(RigError::Interrupted {
                step: "task:dev:server".into()
            })
        );
        assert_eq!(exec.actions(), 1);
    }
}
