//! Package-manager reconciler: activate an exact package-manager version.
//!
//! Same rule as the toolchain: one activation attempt, then the reported
//! version must match exactly.

use rigup_hal::PackageManager;
use rigup_kernel::VerifiedExecutor;
use rigup_kernel::probe::probe_package_manager;
use rigup_types::{ConvergenceOutcome, DesiredState, ManagedResource, RigError};

use super::{Lifecycle, wrong_descriptor};

pub fn reconcile_package_manager(
    resource: &ManagedResource,
    pm: &mut dyn PackageManager,
    exec: &mut VerifiedExecutor,
) -> ConvergenceOutcome {
    let DesiredState::ExactVersion(desired) = resource.desired() else {
        return wrong_descriptor(resource, "version");
    };
    let mut lc = Lifecycle::start(resource);
    if !lc.probed(&probe_package_manager(pm, desired)) {
        return lc.satisfied();
    }

    let name = resource.to_string();
    let result = exec
        .execute(&name, "ensure", || pm.ensure(desired))
        .and_then(|out| exec.verify(&name, out, || Ok(probe_package_manager(pm, desired).matches_desired)))
        .and_then(|verified| {
            if !verified.confirmed {
                return Err(RigError::VersionMismatch {
                    resource: name.clone(),
                    desired: desired.clone(),
                    actual: pm.current_version().unwrap_or_else(|| "none".to_string()),
                    remedy: pm.remedy(desired),
                });
            }
            Ok(verified
                .misreported()
                .then(|| format!("activation reported {}; {desired} verified", verified.reported())))
        });
    lc.finish(result)
}
