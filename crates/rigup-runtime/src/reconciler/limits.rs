//! Kernel resource-limit reconciler (inotify watches and instances).
//!
//! Satisfied limits need nothing, not even a privilege check.  Unmet limits
//! without escalation fail with the exact commands to run by hand.  With
//! escalation each unmet target is raised transiently (`sysctl -w`) and the
//! whole target set is written to the persistent sysctl file; a failed
//! persistence write only warns.

use std::path::Path;

use rigup_hal::{Escalation, Sysctl};
use rigup_kernel::VerifiedExecutor;
use rigup_kernel::probe::probe_limits;
use rigup_types::{ActionOutput, ConvergenceOutcome, DesiredState, LimitTarget, ManagedResource, RigError};

use super::{Lifecycle, wrong_descriptor};

pub fn reconcile_limits(
    resource: &ManagedResource,
    persist_path: &Path,
    sysctl: &dyn Sysctl,
    esc: &mut dyn Escalation,
    exec: &mut VerifiedExecutor,
) -> ConvergenceOutcome {
    let DesiredState::LimitsAtLeast(targets) = resource.desired() else {
        return wrong_descriptor(resource, "limits");
    };
    let mut lc = Lifecycle::start(resource);
    match probe_limits(sysctl, targets) {
        Ok(snap) if !lc.probed(&snap) => return lc.satisfied(),
        Ok(_) => {}
        Err(e) => return lc.failed(e),
    }

    let unmet = match unmet_targets(sysctl, targets) {
        Ok(u) => u,
        Err(e) => return lc.failed(e),
    };
    if !esc.available() {
        return lc.failed(RigError::PrivilegeUnavailable {
            resource: resource.to_string(),
            remedy: manual_remedy(&unmet, targets, persist_path),
        });
    }
    lc.finish(raise(resource, &unmet, targets, persist_path, sysctl, esc, exec))
}

fn raise(
    resource: &ManagedResource,
    unmet: &[LimitTarget],
    targets: &[LimitTarget],
    persist_path: &Path,
    sysctl: &dyn Sysctl,
    esc: &mut dyn Escalation,
    exec: &mut VerifiedExecutor,
) -> Result<Option<String>, RigError> {
    let name = resource.to_string();
    let mut reported = ActionOutput::ok("");
    for target in unmet {
        let argv = vec!["sysctl".to_string(), "-w".to_string(), assignment(target)];
        let out = exec.execute(&name, "raise", || esc.run_elevated(&argv))?;
        if !out.success() {
            reported = out;
        }
    }
    let verified = exec.verify(&name, reported, || {
        Ok(probe_limits(sysctl, targets)?.matches_desired)
    })?;
    if !verified.confirmed {
        return Err(RigError::ActionFailedUnverifiable {
            resource: name,
            details: format!("limits still below target after sysctl -w ({})", verified.reported()),
            remedy: manual_remedy(unmet, targets, persist_path),
        });
    }

    // Never lower a value the machine already has above target.
    let mut persisted = Vec::with_capacity(targets.len());
    for target in targets {
        let current = sysctl.read(&target.key)?.unwrap_or_default();
        persisted.push(LimitTarget::new(target.key.clone(), current.max(target.value)));
    }
    let contents = persist_file(&persisted);
    let out = exec.execute(&name, "persist", || esc.write_file(persist_path, &contents))?;
    if !out.success() {
        return Ok(Some(format!(
            "limits raised for this boot, but writing {} reported {}; they will reset on reboot",
            persist_path.display(),
            out.exit_label()
        )));
    }
    Ok(None)
}

fn unmet_targets(sysctl: &dyn Sysctl, targets: &[LimitTarget]) -> Result<Vec<LimitTarget>, RigError> {
    let mut unmet = Vec::new();
    for target in targets {
        if sysctl.read(&target.key)?.is_none_or(|v| v < target.value) {
            unmet.push(target.clone());
        }
    }
    Ok(unmet)
}

fn assignment(target: &LimitTarget) -> String {
    format!("{}={}", target.key, target.value)
}

fn persist_file(targets: &[LimitTarget]) -> String {
    let mut out = String::from("# Managed by rigup; rewritten on every raise.\n");
    for t in targets {
        out.push_str(&format!("{} = {}\n", t.key, t.value));
    }
    out
}

fn manual_remedy(unmet: &[LimitTarget], targets: &[LimitTarget], persist_path: &Path) -> Vec<String> {
    let mut cmds: Vec<String> = unmet
        .iter()
        .map(|t| format!("sudo sysctl -w {}", assignment(t)))
        .collect();
    let lines: Vec<String> = targets.iter().map(|t| format!("{} = {}", t.key, t.value)).collect();
    cmds.push(format!(
        "printf '{}\\n' | sudo tee {} > /dev/null",
        lines.join("\\n"),
        persist_path.display()
    ));
    cmds
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use rigup_hal::sim::SimWorld;
    use rigup_types::ResourceKind;

    const WATCHES: &str = "fs.inotify.max_user_watches";
    const INSTANCES: &str = "fs.inotify.max_user_instances";

    fn limits() -> ManagedResource {
        ManagedResource::new(
            ResourceKind::ResourceLimit,
            "inotify",
            DesiredState::LimitsAtLeast(vec![
                LimitTarget::new(WATCHES, 524288),
                LimitTarget::new(INSTANCES, 512),
            ]),
        )
    }

    fn persist() -> PathBuf {
        PathBuf::from("/etc/sysctl.d/99-rigup.conf")
    }

    fn run(world: &SimWorld) -> ConvergenceOutcome {
        reconcile_limits(
            &limits(),
            &persist(),
            &world.sysctl(),
            &mut world.escalation(),
            &mut VerifiedExecutor::new(),
        )
    }

    #[test]
    fn satisfied_limits_need_no_escalation() {
        for escalation in [false, true] {
            let world = SimWorld::new()
                .with_sysctl(WATCHES, 524288)
                .with_sysctl(INSTANCES, 1024)
                .with_escalation(escalation);
            assert_eq!(run(&world), ConvergenceOutcome::AlreadySatisfied);
            assert_eq!(world.action_count(), 0);
        }
    }

    #[test]
    fn unprivileged_low_limit_fails_with_exact_commands() {
        let world = SimWorld::new().with_sysctl(WATCHES, 8192).with_sysctl(INSTANCES, 512);
        let ConvergenceOutcome::Failed(err) = run(&world) else {
            panic!("expected failure");
        };
        assert!(matches!(err, RigError::PrivilegeUnavailable { .. }));
        assert_eq!(err.remedy()[0], "sudo sysctl -w fs.inotify.max_user_watches=524288");
        assert!(err.remedy()[1].contains("524288"));
        assert_eq!(world.action_count(), 0);
    }

    #[test]
    fn privileged_raise_is_transient_and_persistent() {
        let world = SimWorld::new()
            .with_sysctl(WATCHES, 8192)
            .with_sysctl(INSTANCES, 1024)
            .with_escalation(true);
        assert_eq!(run(&world), ConvergenceOutcome::Converged);
        assert_eq!(
            world.actions(),
            vec![
                "sudo sysctl -w fs.inotify.max_user_watches=524288",
                "sudo tee /etc/sysctl.d/99-rigup.conf",
            ]
        );
        let state = world.state();
        let written = &state.written_files[&persist()];
        assert!(written.contains("fs.inotify.max_user_watches = 524288"));
        // Existing higher value is kept.
        assert!(written.contains("fs.inotify.max_user_instances = 1024"));
    }

    #[test]
    fn persistence_failure_is_a_warning() {
        let world = SimWorld::new()
            .with_sysctl(WATCHES, 8192)
            .with_sysctl(INSTANCES, 128)
            .with_escalation(true);
        world.state_mut().write_code = 1;
        let outcome = run(&world);
        assert!(matches!(outcome, ConvergenceOutcome::ConvergedWithWarning(_)));
        assert_eq!(world.state().sysctl[WATCHES], 524288);
        assert_eq!(world.state().sysctl[INSTANCES], 512);
    }
}
