//! Toolchain reconciler: install and activate an exact runtime version.
//!
//! After activation the reported version is read again and must equal the
//! desired one exactly.  A mismatch is a hard [`RigError::VersionMismatch`];
//! there is no second attempt.

use rigup_hal::VersionManager;
use rigup_kernel::VerifiedExecutor;
use rigup_kernel::probe::probe_toolchain;
use rigup_types::{ConvergenceOutcome, DesiredState, ManagedResource, RigError};

use tracing::debug;

use super::{Lifecycle, wrong_descriptor};

pub fn reconcile_toolchain(
    resource: &ManagedResource,
    vm: &mut dyn VersionManager,
    exec: &mut VerifiedExecutor,
) -> ConvergenceOutcome {
    let DesiredState::ExactVersion(desired) = resource.desired() else {
        return wrong_descriptor(resource, "version");
    };
    let mut lc = Lifecycle::start(resource);
    if !lc.probed(&probe_toolchain(vm, desired)) {
        return lc.satisfied();
    }
    lc.finish(converge(resource, desired, vm, exec))
}

fn converge(
    resource: &ManagedResource,
    desired: &str,
    vm: &mut dyn VersionManager,
    exec: &mut VerifiedExecutor,
) -> Result<Option<String>, RigError> {
    let name = resource.to_string();
    let install = exec.execute(&name, "install", || vm.install(desired))?;
    let activate = exec.execute(&name, "activate", || vm.activate(desired))?;
    let verified = exec.verify(&name, activate, || Ok(probe_toolchain(vm, desired).matches_desired))?;

    if !verified.confirmed {
        return Err(RigError::VersionMismatch {
            resource: name,
            desired: desired.to_string(),
            actual: vm.current_version().unwrap_or_else(|| "none".to_string()),
            remedy: vm.remedy(desired),
        });
    }

    if !install.success() {
        // Most managers exit non-zero when the version is already installed.
        debug!(resource = %name, install = %install.exit_label(), "install failed; activation verified");
    }
    Ok(verified
        .misreported()
        .then(|| format!("activate reported {}; {desired} verified active", verified.reported())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigup_hal::sim::SimWorld;
    use rigup_types::ResourceKind;

    fn node(version: &str) -> ManagedResource {
        ManagedResource::new(
            ResourceKind::ToolchainVersion,
            "node",
            DesiredState::ExactVersion(version.into()),
        )
    }

    #[test]
    fn matching_version_takes_no_action() {
        let world = SimWorld::new().with_active_version("20.11.1");
        let mut exec = VerifiedExecutor::new();
        let outcome = reconcile_toolchain(&node("20.11.1"), &mut world.version_manager(), &mut exec);
        assert_eq!(outcome, ConvergenceOutcome::AlreadySatisfied);
        assert_eq!(world.action_count(), 0);
        assert_eq!(exec.actions(), 0);
    }

    #[test]
    fn missing_version_is_installed_and_activated() {
        let world = SimWorld::new();
        let mut exec = VerifiedExecutor::new();
        let outcome = reconcile_toolchain(&node("20.11.1"), &mut world.version_manager(), &mut exec);
        assert_eq!(outcome, ConvergenceOutcome::Converged);
        assert_eq!(world.actions(), vec!["install 20.11.1", "activate 20.11.1"]);
        assert_eq!(world.state().active_version.as_deref(), Some("20.11.1"));
    }

    #[test]
    fn newer_version_is_not_accepted() {
        let world = SimWorld::new().with_active_version("22.1.0");
        let mut exec = VerifiedExecutor::new();
        let outcome = reconcile_toolchain(&node("20.11.1"), &mut world.version_manager(), &mut exec);
        assert!(outcome.is_converged());
        assert_eq!(world.state().active_version.as_deref(), Some("20.11.1"));
    }

    #[test]
    fn installed_but_inactive_converges_quietly() {
        let world = SimWorld::new().with_active_version("20.11.1");
        world.state_mut().active_version = Some("18.0.0".into());
        let mut exec = VerifiedExecutor::new();
        let outcome = reconcile_toolchain(&node("20.11.1"), &mut world.version_manager(), &mut exec);
        // The reinstall exits 1, but activation is verified.
        assert_eq!(outcome, ConvergenceOutcome::Converged);
        assert_eq!(world.actions(), vec!["install 20.11.1", "activate 20.11.1"]);
    }

    #[test]
    fn drift_after_activation_is_hard_failure() {
        let world = SimWorld::new();
        world.state_mut().pinned_report = Some("20.0.0".into());
        let mut exec = VerifiedExecutor::new();
        let outcome = reconcile_toolchain(&node("20.11.1"), &mut world.version_manager(), &mut exec);
        let ConvergenceOutcome::Failed(RigError::VersionMismatch { actual, remedy, .. }) = outcome else {
            panic!("expected VersionMismatch, got {outcome:?}");
        };
        assert_eq!(actual, "20.0.0");
        assert!(remedy.iter().any(|c| c.contains("20.11.1")));
        // Exactly one install + one activation: no retry loop.
        assert_eq!(exec.actions(), 2);
    }

    #[test]
    fn wrong_descriptor_is_configuration_error() {
        let res = ManagedResource::new(ResourceKind::ToolchainVersion, "node", DesiredState::NetworkPresent);
        let world = SimWorld::new();
        let outcome = reconcile_toolchain(&res, &mut world.version_manager(), &mut VerifiedExecutor::new());
        assert!(matches!(outcome, ConvergenceOutcome::Failed(RigError::Configuration { .. })));
    }
}
