//! Dependency-install reconciler.
//!
//! Skip or install is decided by the manifest fingerprint alone.  An install
//! counts only when it exits zero *and* the install directory exists
//! afterwards; only then is the new fingerprint recorded.  A failed install
//! leaves the previous fingerprint in place so the next run retries.

use std::path::Path;

use rigup_hal::PackageManager;
use rigup_kernel::probe::probe_path;
use rigup_kernel::{ChangeDetector, InstallDecision, VerifiedExecutor};
use rigup_types::{ConvergenceOutcome, DesiredState, ManagedResource, RigError, StateSnapshot};
use tracing::info;

use super::{Lifecycle, remedy, wrong_descriptor};

pub fn reconcile_dependencies(
    resource: &ManagedResource,
    root: &Path,
    detector: &ChangeDetector,
    pm: &mut dyn PackageManager,
    exec: &mut VerifiedExecutor,
) -> ConvergenceOutcome {
    let DesiredState::InstalledFrom { install_dir, .. } = resource.desired() else {
        return wrong_descriptor(resource, "install");
    };
    let mut lc = Lifecycle::start(resource);
    let decision = match detector.check() {
        Ok(d) => d,
        Err(e) => return lc.failed(e),
    };
    if !lc.probed(&snapshot(&decision)) {
        info!(resource = %resource, manifest = %detector.manifest().display(), "dependencies unchanged");
        return lc.satisfied();
    }
    info!(resource = %resource, reason = decision.reason(), "installing dependencies");

    let install_dir = root.join(install_dir);
    let name = resource.to_string();
    let result = (|| -> Result<Option<String>, RigError> {
        let out = exec.execute(&name, "install", || pm.install_dependencies())?;
        let exited_ok = out.success();
        let verified = exec.verify(&name, out, || Ok(exited_ok && probe_path(&install_dir).present))?;
        if !verified.confirmed {
            return Err(RigError::ActionFailedUnverifiable {
                resource: name.clone(),
                details: format!(
                    "install reported {}; {} {}",
                    verified.output.exit_label(),
                    install_dir.display(),
                    if probe_path(&install_dir).present { "present" } else { "missing" }
                ),
                remedy: remedy([pm.install_command()]),
            });
        }
        detector.record_success(&decision)?;
        Ok(None)
    })();
    lc.finish(result)
}

fn snapshot(decision: &InstallDecision) -> StateSnapshot {
    let snap = match decision {
        InstallDecision::ManifestMissing => StateSnapshot::absent(),
        d => StateSnapshot::present(!d.install_required()),
    };
    snap.with_detail("decision", decision.reason())
}
