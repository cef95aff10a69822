//! Per-resource reconcilers.
//!
//! Each reconciler takes the [`ManagedResource`] it converges, only the
//! collaborators it needs, and a [`VerifiedExecutor`][rigup_kernel::VerifiedExecutor].
//! It returns a [`ConvergenceOutcome`]; collaborator errors become
//! [`ConvergenceOutcome::Failed`].  The [`Lifecycle`] tracks the resource's
//! phase and logs every transition.

use rigup_types::{ConvergenceOutcome, ManagedResource, RigError, StateSnapshot};
use tracing::{debug, error, info, warn};

pub mod config_file;
pub mod container;
pub mod dependencies;
pub mod limits;
pub mod package_manager;
pub mod task;
pub mod toolchain;

pub use config_file::{FileTemplate, TemplateSource, reconcile_config_file};
pub use container::{Readiness, reconcile_network, reconcile_service};
pub use dependencies::reconcile_dependencies;
pub use limits::reconcile_limits;
pub use package_manager::reconcile_package_manager;
pub use task::{reconcile_one_time_task, run_foreground_task};
pub use toolchain::reconcile_toolchain;

/// Where a resource is in its reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unknown,
    Probed,
    Satisfied,
    NeedsAction,
    Converged,
    Failed,
}

impl Phase {
    /// Whether `self → next` is a legal transition.
    pub fn allows(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Unknown, Phase::Probed)
                | (Phase::Unknown, Phase::Failed)
                | (Phase::Probed, Phase::Satisfied)
                | (Phase::Probed, Phase::NeedsAction)
                | (Phase::NeedsAction, Phase::Converged)
                | (Phase::NeedsAction, Phase::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Satisfied | Phase::Converged | Phase::Failed)
    }
}

/// Phase tracker for one reconciliation.
#[derive(Debug)]
pub struct Lifecycle<'a> {
    resource: &'a ManagedResource,
    phase: Phase,
}

impl<'a> Lifecycle<'a> {
    pub fn start(resource: &'a ManagedResource) -> Self {
        Self {
            resource,
            phase: Phase::Unknown,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, next: Phase) {
        if !self.phase.allows(next) {
            error!(resource = %self.resource, from = ?self.phase, to = ?next, "illegal phase transition");
        }
        debug!(resource = %self.resource, from = ?self.phase, to = ?next, "phase");
        self.phase = next;
    }

    /// Record a probe.  Returns `true` when action is needed.
    pub fn probed(&mut self, snapshot: &StateSnapshot) -> bool {
        self.advance(Phase::Probed);
        if snapshot.matches_desired {
            self.advance(Phase::Satisfied);
            false
        } else {
            debug!(resource = %self.resource, details = ?snapshot.details, "needs action");
            self.advance(Phase::NeedsAction);
            true
        }
    }

    pub fn satisfied(self) -> ConvergenceOutcome {
        info!(resource = %self.resource, "already satisfied");
        ConvergenceOutcome::AlreadySatisfied
    }

    /// Terminal `Converged`, with an optional warning for the operator.
    pub fn converged(mut self, warning: Option<String>) -> ConvergenceOutcome {
        self.advance(Phase::Converged);
        match warning {
            Some(reason) => {
                warn!(resource = %self.resource, %reason, "converged with warning");
                ConvergenceOutcome::ConvergedWithWarning(reason)
            }
            None => {
                info!(resource = %self.resource, "converged");
                ConvergenceOutcome::Converged
            }
        }
    }

    pub fn failed(mut self, err: RigError) -> ConvergenceOutcome {
        self.advance(Phase::Failed);
        error!(resource = %self.resource, error = %err, "reconciliation failed");
        ConvergenceOutcome::Failed(err)
    }

    /// Settle a fallible convergence attempt.
    pub fn finish(self, result: Result<Option<String>, RigError>) -> ConvergenceOutcome {
        match result {
            Ok(warning) => self.converged(warning),
            Err(err) => self.failed(err),
        }
    }
}

/// The resource was built with a descriptor its reconciler does not handle.
pub(crate) fn wrong_descriptor(resource: &ManagedResource, expected: &str) -> ConvergenceOutcome {
    ConvergenceOutcome::Failed(RigError::configuration(format!(
        "{resource}: expected a {expected} descriptor, got {:?}",
        resource.desired()
    )))
}

/// Remedy command list built from `&str`s.
pub(crate) fn remedy<I, S>(cmds: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    cmds.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigup_types::{DesiredState, ResourceKind};

    fn resource() -> ManagedResource {
        ManagedResource::new(
            ResourceKind::ToolchainVersion,
            "node",
            DesiredState::ExactVersion("20.11.1".into()),
        )
    }

    #[test]
    fn legal_transitions() {
        assert!(Phase::Unknown.allows(Phase::Probed));
        assert!(Phase::Probed.allows(Phase::Satisfied));
        assert!(Phase::Probed.allows(Phase::NeedsAction));
        assert!(Phase::NeedsAction.allows(Phase::Converged));
        assert!(Phase::NeedsAction.allows(Phase::Failed));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!Phase::Satisfied.allows(Phase::NeedsAction));
        assert!(!Phase::Probed.allows(Phase::Converged));
        assert!(!Phase::Converged.allows(Phase::Failed));
    }

    #[test]
    fn satisfied_path() {
        let res = resource();
        let mut lc = Lifecycle::start(&res);
        assert!(!lc.probed(&StateSnapshot::present(true)));
        assert_eq!(lc.phase(), Phase::Satisfied);
        assert!(lc.phase().is_terminal());
        assert_eq!(lc.satisfied(), ConvergenceOutcome::AlreadySatisfied);
    }

    #[test]
    fn needs_action_then_warning() {
        let res = resource();
        let mut lc = Lifecycle::start(&res);
        assert!(lc.probed(&StateSnapshot::absent()));
        assert_eq!(lc.phase(), Phase::NeedsAction);
        let outcome = lc.finish(Ok(Some("misreported".into())));
        assert_eq!(outcome, ConvergenceOutcome::ConvergedWithWarning("misreported".into()));
    }

    #[test]
    fn finish_with_error_fails() {
        let res = resource();
        let mut lc = Lifecycle::start(&res);
        lc.probed(&StateSnapshot::absent());
        let outcome = lc.finish(Err(RigError::configuration("x")));
        assert!(outcome.is_failed());
    }
}
