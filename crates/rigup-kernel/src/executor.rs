//! [`VerifiedExecutor`] – the single path through which convergence actions
//! run.
//!
//! An action's exit status is recorded but never trusted: external tools in
//! this domain routinely exit non-zero on a second, idempotent invocation
//! while leaving the machine in exactly the right state.  After every action
//! the caller re-probes through [`VerifiedExecutor::verify`], and only that
//! probe decides whether the resource converged.
//!
//! The two steps are separate calls so the action can borrow a collaborator
//! mutably and the probe can then borrow it again.
//!
//! # Example
//!
//! ```
//! use rigup_kernel::executor::VerifiedExecutor;
//! use rigup_types::ActionOutput;
//!
//! let mut exec = VerifiedExecutor::new();
//! let output = exec.execute("network:app-net", "create", || Ok(ActionOutput::failed(1, "exists")))
//!     .unwrap();
//! let verified = exec.verify("network:app-net", output, || Ok(true)).unwrap();
//!
//! assert!(verified.confirmed);
//! assert!(verified.misreported());
//! assert_eq!(exec.actions(), 1);
//! ```

use rigup_types::{ActionOutput, RigError};
use tracing::{debug, info, warn};

/// An action's raw output paired with the independent verdict on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub output: ActionOutput,
    /// The re-probe found the desired state.
    pub confirmed: bool,
}

impl Verified {
    /// The action reported failure, yet the desired state holds.
    pub fn misreported(&self) -> bool {
        self.confirmed && !self.output.success()
    }

    /// Short description of the action's own status for messages.
    pub fn reported(&self) -> String {
        let stderr = self.output.stderr.trim();
        if stderr.is_empty() {
            self.output.exit_label()
        } else {
            let first = stderr.lines().next().unwrap_or_default();
            format!("{}: {first}", self.output.exit_label())
        }
    }
}

/// Runs actions, counts them, and pairs them with verification.
#[derive(Debug, Default)]
pub struct VerifiedExecutor {
    actions: usize,
}

impl VerifiedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one convergence action and return its raw output.
    ///
    /// # Errors
    ///
    /// Only when the action could not be started at all; a non-zero exit is
    /// `Ok`.
    pub fn execute<F>(&mut self, resource: &str, label: &str, action: F) -> Result<ActionOutput, RigError>
    where
        F: FnOnce() -> Result<ActionOutput, RigError>,
    {
        self.actions += 1;
        info!(resource, action = label, "applying");
        let output = action()?;
        debug!(resource, action = label, exit = %output.exit_label(), "action returned");
        Ok(output)
    }

    /// Re-probe after an action.  The probe's answer is authoritative.
    pub fn verify<P>(&self, resource: &str, output: ActionOutput, probe: P) -> Result<Verified, RigError>
    where
        P: FnOnce() -> Result<bool, RigError>,
    {
        let confirmed = probe()?;
        let verified = Verified { output, confirmed };
        if verified.misreported() {
            warn!(
                resource,
                reported = %verified.reported(),
                "action reported failure but the desired state is verified"
            );
        } else if !confirmed {
            warn!(resource, reported = %verified.reported(), "desired state not reached");
        }
        Ok(verified)
    }

    /// Number of actions executed so far.
    pub fn actions(&self) -> usize {
        self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_confirmed() {
        let mut exec = VerifiedExecutor::new();
        let out = exec.execute("r", "a", || Ok(ActionOutput::ok(""))).unwrap();
        let v = exec.verify("r", out, || Ok(true)).unwrap();
        assert!(v.confirmed);
        assert!(!v.misreported());
    }

    #[test]
    fn zero_exit_is_not_trusted() {
        let mut exec = VerifiedExecutor::new();
        let out = exec.execute("r", "a", || Ok(ActionOutput::ok(""))).unwrap();
        let v = exec.verify("r", out, || Ok(false)).unwrap();
        assert!(!v.confirmed);
    }

    #[test]
    fn failure_with_verified_state_is_misreported() {
        let mut exec = VerifiedExecutor::new();
        let out = exec
            .execute("r", "a", || Ok(ActionOutput::failed(1, "already exists\nmore")))
            .unwrap();
        let v = exec.verify("r", out, || Ok(true)).unwrap();
        assert!(v.misreported());
        assert_eq!(v.reported(), "exit 1: already exists");
    }

    #[test]
    fn spawn_error_propagates_and_counts() {
        let mut exec = VerifiedExecutor::new();
        let err = exec
            .execute("r", "a", || {
                Err(RigError::Io {
                    path: "sh".into(),
                    details: "no such file".into(),
                    remedy: vec!["docker network create app-net".into()],
                })
            })
            .unwrap_err();
        assert!(matches!(err, RigError::Io { .. }));
        assert_eq!(exec.actions(), 1);
    }

    #[test]
    fn verify_alone_does_not_count_as_action() {
        let exec = VerifiedExecutor::new();
        exec.verify("r", ActionOutput::ok(""), || Ok(true)).unwrap();
        assert_eq!(exec.actions(), 0);
    }
}
